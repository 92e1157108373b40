//! A typed look at the JSON a status query returns. The protocol code hands
//! back the raw text; this is for callers that want the usual fields.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusResponse {
    pub version: StatusVersion,
    #[serde(default)]
    pub players: Option<StatusPlayers>,
    #[serde(default)]
    pub description: Option<Description>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(
        rename = "enforcesSecureChat",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub enforces_secure_chat: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusVersion {
    pub name: String,
    pub protocol: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatusPlayers {
    pub max: i32,
    pub online: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<Vec<PlayerSample>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerSample {
    pub name: String,
    pub id: String,
}

/// A bare string, a chat component, or a list of either (the first element
/// is the parent of the rest).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Description {
    Text(String),
    Component(TextComponent),
    List(Vec<Description>),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TextComponent {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Description>,
}

impl Description {
    /// The description with formatting thrown away.
    pub fn to_plain(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out);
        out
    }

    fn write_plain(&self, out: &mut String) {
        match self {
            Description::Text(text) => out.push_str(text),
            Description::Component(component) => {
                out.push_str(&component.text);
                for extra in &component.extra {
                    extra.write_plain(out);
                }
            }
            Description::List(parts) => {
                for part in parts {
                    part.write_plain(out);
                }
            }
        }
    }
}

impl StatusResponse {
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn motd(&self) -> String {
        self.description
            .as_ref()
            .map(Description::to_plain)
            .unwrap_or_default()
    }

    pub fn player_names(&self) -> Vec<&str> {
        self.players
            .iter()
            .flat_map(|p| p.sample.iter().flatten())
            .map(|p| p.name.as_str())
            .collect()
    }
}
