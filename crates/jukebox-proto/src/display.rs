//! Display model: what the transport renders.
//!
//! A `PanelView` is a rich `Document` (title, description, fields, footer) plus
//! an optional row-grouped set of interactive controls.  Controls are addressed
//! by `ControlId`, never by their emoji or position, so the core can restyle a
//! button without scanning rendered output.

use serde::{Deserialize, Serialize};

pub const COLOR_INFO: u32 = 0x3498DB;
pub const COLOR_DANGER: u32 = 0xE74C3C;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub color: u32,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub footer: Option<String>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            color: COLOR_INFO,
            thumbnail: None,
            fields: Vec::new(),
            footer: None,
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = color;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Stable identifiers for every interactive control we ever attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlId {
    // now-playing panel
    Restart,
    Stop,
    PlayPause,
    Skip,
    Repeat,
    Shuffle,
    VolumeUp,
    VolumeDown,
    // queue browser
    PrevPage,
    NextPage,
    ShuffleQueue,
    CloseQueue,
}

impl ControlId {
    pub fn is_queue_control(&self) -> bool {
        matches!(
            self,
            ControlId::PrevPage | ControlId::NextPage | ControlId::ShuffleQueue | ControlId::CloseQueue
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    pub emoji: String,
    pub style: ButtonStyle,
    pub row: u8,
}

/// Ordered set of controls keyed by `ControlId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ControlSet {
    controls: Vec<Control>,
}

impl ControlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, id: ControlId, emoji: &str, style: ButtonStyle, row: u8) -> Self {
        self.controls.push(Control {
            id,
            emoji: emoji.to_string(),
            style,
            row,
        });
        self
    }

    pub fn get(&self, id: ControlId) -> Option<&Control> {
        self.controls.iter().find(|c| c.id == id)
    }

    /// Restyle a control.  Returns false if the set doesn't carry `id`.
    pub fn set_style(&mut self, id: ControlId, style: ButtonStyle) -> bool {
        match self.controls.iter_mut().find(|c| c.id == id) {
            Some(control) => {
                control.style = style;
                true
            }
            None => false,
        }
    }

    pub fn set_emoji(&mut self, id: ControlId, emoji: &str) -> bool {
        match self.controls.iter_mut().find(|c| c.id == id) {
            Some(control) => {
                control.emoji = emoji.to_string();
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Control> {
        self.controls.iter()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }
}

/// A complete message as the transport should show it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelView {
    pub document: Document,
    #[serde(default)]
    pub controls: ControlSet,
}

impl PanelView {
    pub fn new(document: Document, controls: ControlSet) -> Self {
        Self { document, controls }
    }

    /// A view with no interactive controls attached.
    pub fn detached(document: Document) -> Self {
        Self {
            document,
            controls: ControlSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_set_addresses_by_id() {
        let mut set = ControlSet::new()
            .push(ControlId::Repeat, "🔄", ButtonStyle::Secondary, 1)
            .push(ControlId::PlayPause, "⏯️", ButtonStyle::Primary, 0);

        assert!(set.set_style(ControlId::Repeat, ButtonStyle::Success));
        assert!(set.set_emoji(ControlId::PlayPause, "▶️"));
        assert!(!set.set_style(ControlId::NextPage, ButtonStyle::Danger));

        assert_eq!(set.get(ControlId::Repeat).unwrap().style, ButtonStyle::Success);
        assert_eq!(set.get(ControlId::PlayPause).unwrap().emoji, "▶️");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_control_id_wire_names() {
        let json = serde_json::to_string(&ControlId::VolumeUp).unwrap();
        assert_eq!(json, "\"volume_up\"");
        assert!(ControlId::CloseQueue.is_queue_control());
        assert!(!ControlId::Skip.is_queue_control());
    }
}
