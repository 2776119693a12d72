//! Delivery markers
//!
//! A marker is a short telemetry string recording which transport confirmed
//! an entry. It sits outside the signature and the ordering key, and is the
//! only thing the ledger ever rewrites on a committed entry.
//!
//! Markers are written with a leading `"· "` for display; the merge rule
//! compares the bare tag so `"sub"` and `"· sub"` are the same marker.

/// Arrived over the primary realtime subscription
pub const MARKER_SUB: &str = "· sub";
/// Arrived over the bridge relay
pub const MARKER_ONLINE: &str = "· online";
/// Arrived over the local radio mesh
pub const MARKER_MESH: &str = "· mesh";

const TAG_SUB: &str = "sub";
const TAG_ONLINE: &str = "online";
const TAG_SUB_ONLINE: &str = "sub→online";
const DISPLAY_PREFIX: &str = "· ";

fn tag(marker: &str) -> &str {
    marker.trim_start_matches('·').trim()
}

/// Merge an incoming marker into the current one.
///
/// - no current marker: take the incoming one
/// - `sub` then `online`, or `online` then `sub`: `sub→online`
/// - anything else: keep the current marker
///
/// The combined marker keeps the display prefix of the current marker.
pub fn merge_delivery_marker(current: Option<&str>, incoming: Option<&str>) -> Option<String> {
    let Some(current) = current else {
        return incoming.map(str::to_string);
    };
    let Some(incoming) = incoming else {
        return Some(current.to_string());
    };

    match (tag(current), tag(incoming)) {
        (TAG_SUB, TAG_ONLINE) | (TAG_ONLINE, TAG_SUB) => {
            if current.starts_with('·') {
                Some(format!("{}{}", DISPLAY_PREFIX, TAG_SUB_ONLINE))
            } else {
                Some(TAG_SUB_ONLINE.to_string())
            }
        }
        _ => Some(current.to_string()),
    }
}
