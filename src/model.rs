use serde::{Deserialize, Deserializer, Serialize};

/// Pull-request facts carried from the trigger to the outgoing mail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrNotification {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default = "default_title", deserialize_with = "or_default_title")]
    pub title: String,
    #[serde(default = "default_author", deserialize_with = "or_default_author")]
    pub author: String,
    #[serde(default = "default_url", deserialize_with = "or_default_url")]
    pub url: String,
    #[serde(
        default = "default_description",
        deserialize_with = "or_default_description"
    )]
    pub description: String,
    #[serde(
        default = "default_branch_from",
        deserialize_with = "or_default_branch_from"
    )]
    pub branch_from: String,
    #[serde(default = "default_branch_to", deserialize_with = "or_default_branch_to")]
    pub branch_to: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

pub const NO_DESCRIPTION: &str = "No description provided";

fn default_title() -> String {
    "New Pull Request".into()
}
fn default_author() -> String {
    "Unknown Author".into()
}
fn default_url() -> String {
    "#".into()
}
fn default_description() -> String {
    NO_DESCRIPTION.into()
}
fn default_branch_from() -> String {
    "feature-branch".into()
}
fn default_branch_to() -> String {
    "main".into()
}

// `null` in a JSON body means the same as a missing key.
macro_rules! null_as_default {
    ($($name:ident => $default:ident),* $(,)?) => {
        $(
            fn $name<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
                Ok(Option::<String>::deserialize(d)?.unwrap_or_else($default))
            }
        )*
    };
}

null_as_default! {
    or_default_title => default_title,
    or_default_author => default_author,
    or_default_url => default_url,
    or_default_description => default_description,
    or_default_branch_from => default_branch_from,
    or_default_branch_to => default_branch_to,
}

impl Default for PrNotification {
    fn default() -> Self {
        Self {
            number: None,
            title: default_title(),
            author: default_author(),
            url: default_url(),
            description: default_description(),
            branch_from: default_branch_from(),
            branch_to: default_branch_to(),
            files_changed: Vec::new(),
            repository_name: None,
            repository_url: None,
            action: None,
        }
    }
}

impl PrNotification {
    /// `#42`, or `Unknown` when the number is missing.
    pub fn number_label(&self) -> String {
        match self.number {
            Some(n) => format!("#{}", n),
            None => "Unknown".to_string(),
        }
    }

    /// Bare number for templates that add their own `#`.
    pub fn number_text(&self) -> String {
        self.number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn files_label(&self) -> String {
        if self.files_changed.is_empty() {
            "Not specified".to_string()
        } else {
            self.files_changed.join(", ")
        }
    }
}

/// Subject and HTML body of a notification mail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Model,
    Fallback,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::Model => "model",
            ContentSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedEmail {
    pub content: EmailContent,
    pub source: ContentSource,
}
