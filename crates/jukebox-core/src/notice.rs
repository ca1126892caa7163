//! Classification of notifications the backend posts on its own.

use jukebox_proto::protocol::{BackendNotice, NotificationKind};

/// Phrases the backend uses in its own notification titles, English and
/// Portuguese.  Checked in order, first hit wins.
const PHRASES: &[(&str, NotificationKind)] = &[
    ("now playing", NotificationKind::TrackStarted),
    ("tocando agora", NotificationKind::TrackStarted),
    ("track paused", NotificationKind::Paused),
    ("música pausada", NotificationKind::Paused),
    ("track resumed", NotificationKind::Resumed),
    ("música retomada", NotificationKind::Resumed),
    ("track skipped", NotificationKind::Skipped),
    ("música pulada", NotificationKind::Skipped),
    ("track enqueued", NotificationKind::TrackEnqueued),
    ("música enfileirada", NotificationKind::TrackEnqueued),
    ("track added", NotificationKind::TrackAdded),
    ("música adicionada", NotificationKind::TrackAdded),
    ("volume", NotificationKind::VolumeChanged),
];

/// Structured kind when the bridge sent one, otherwise a text match on the
/// title and then the content.
pub fn classify(notice: &BackendNotice) -> Option<NotificationKind> {
    if let Some(kind) = notice.kind {
        return Some(kind);
    }
    [notice.title.as_deref(), notice.content.as_deref()]
        .into_iter()
        .flatten()
        .find_map(match_text)
}

fn match_text(text: &str) -> Option<NotificationKind> {
    let text = text.to_lowercase();
    PHRASES
        .iter()
        .find(|(phrase, _)| text.contains(phrase))
        .map(|(_, kind)| *kind)
}
