//! Pure rendering: backend state in, display documents out.

use jukebox_proto::display::{ButtonStyle, ControlId, ControlSet, Document, COLOR_DANGER};
use jukebox_proto::model::{GuildSettings, PlayerSnapshot, Track};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub const FIELD_QUEUE: &str = "Queue";
pub const FIELD_VOLUME: &str = "Volume";
pub const FIELD_REQUESTER: &str = "Requested by";
pub const FIELD_MODE: &str = "Mode";
pub const FIELD_NOW_PLAYING: &str = "🎵 Now Playing";

pub const TITLE_NOW_PLAYING: &str = "🎵 Now Playing";
pub const TITLE_NOTHING_PLAYING: &str = "🎵 Nothing Playing";
pub const TITLE_QUEUE: &str = "📋 Queue";

const NEXT_TITLE_WIDTH: usize = 30;

/// `mm:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration(ms: u64) -> String {
    let s = ms / 1000;
    let h = s / 3600;
    let m = (s % 3600) / 60;
    let s = s % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Cut `text` to at most `max_width` terminal/display columns, marking the cut
/// with an ellipsis.
pub fn truncate_display(text: &str, max_width: usize) -> String {
    if text.width() <= max_width {
        return text.to_string();
    }
    let budget = max_width.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push('…');
    out
}

pub fn nothing_playing() -> Document {
    Document::new(TITLE_NOTHING_PLAYING).description("There is no music playing right now.")
}

pub fn loading() -> Document {
    Document::new(TITLE_NOW_PLAYING).description("Loading track information...")
}

pub fn stopped() -> Document {
    Document::new("⏹️ Playback Stopped")
        .description("Music playback has been stopped.")
        .color(COLOR_DANGER)
}

pub fn skipped(skipped: &Track, now: Option<&Track>) -> Document {
    let doc = Document::new("⏭️ Track Skipped").description(format!("**{}**", skipped.description()));
    match now {
        Some(track) => doc.field(FIELD_NOW_PLAYING, format!("**{}**", track.description()), false),
        None => doc,
    }
}

/// The now-playing document.  Falls back to `nothing_playing` when there is no
/// current track.
pub fn now_playing(snapshot: &PlayerSnapshot, settings: &GuildSettings) -> Document {
    let Some(track) = snapshot.current.as_ref() else {
        return nothing_playing();
    };

    let (status, duration) = if track.is_stream {
        ("🔴 LIVE STREAM", "LIVE".to_string())
    } else if snapshot.paused {
        ("⏸️", format_duration(track.length_ms))
    } else {
        ("▶️", format_duration(track.length_ms))
    };

    let title = if track.title.trim().is_empty() {
        "Unknown"
    } else {
        track.title.as_str()
    };
    let heading = match &track.uri {
        Some(uri) => format!("[**{}**]({})", title, uri),
        None => format!("**{}**", title),
    };

    let mut doc = Document::new(format!("{} Now Playing", status))
        .description(format!("{}\n\n**Duration:** `{}`", heading, duration));
    if settings.thumbnail {
        doc.thumbnail = track.thumbnail.clone();
    }

    if let Some(next) = snapshot.queue.first() {
        doc = doc.field(
            FIELD_QUEUE,
            format!(
                "**{}** tracks in queue\n**Next:** {}",
                snapshot.queue.len(),
                truncate_display(&next.description(), NEXT_TITLE_WIDTH)
            ),
            false,
        );
    }

    doc = doc.field(FIELD_VOLUME, format!("{}%", settings.volume), true);
    if let Some(requester) = &track.requester {
        doc = doc.field(FIELD_REQUESTER, requester.clone(), true);
    }

    let mut modes = Vec::new();
    if settings.repeat {
        modes.push("🔄 Repeat");
    }
    if settings.shuffle {
        modes.push("🔀 Shuffle");
    }
    if settings.auto_play {
        modes.push("⏭️ Auto-Play");
    }
    if !modes.is_empty() {
        doc = doc.field(FIELD_MODE, modes.join(" | "), true);
    }

    doc
}

pub fn panel_controls() -> ControlSet {
    ControlSet::new()
        .push(ControlId::Restart, "⏮️", ButtonStyle::Primary, 0)
        .push(ControlId::Stop, "⏹️", ButtonStyle::Danger, 0)
        .push(ControlId::PlayPause, "⏯️", ButtonStyle::Primary, 0)
        .push(ControlId::Skip, "⏭️", ButtonStyle::Primary, 0)
        .push(ControlId::Repeat, "🔄", ButtonStyle::Secondary, 1)
        .push(ControlId::Shuffle, "🔀", ButtonStyle::Secondary, 1)
        .push(ControlId::VolumeUp, "🔊", ButtonStyle::Secondary, 1)
        .push(ControlId::VolumeDown, "🔉", ButtonStyle::Secondary, 1)
}

/// Restyle the toggle-type controls to match current state.
pub fn sync_controls(controls: &mut ControlSet, snapshot: &PlayerSnapshot, settings: &GuildSettings) {
    let toggle = |on: bool| {
        if on {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        }
    };
    controls.set_style(ControlId::Repeat, toggle(settings.repeat));
    controls.set_style(ControlId::Shuffle, toggle(settings.shuffle));
    controls.set_emoji(
        ControlId::PlayPause,
        if snapshot.paused { "▶️" } else { "⏸️" },
    );
}

pub fn queue_controls() -> ControlSet {
    ControlSet::new()
        .push(ControlId::PrevPage, "⬅️", ButtonStyle::Secondary, 0)
        .push(ControlId::NextPage, "➡️", ButtonStyle::Secondary, 0)
        .push(ControlId::ShuffleQueue, "🔄", ButtonStyle::Secondary, 0)
        .push(ControlId::CloseQueue, "❌", ButtonStyle::Danger, 0)
}
