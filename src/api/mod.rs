use serde::{Deserialize, Serialize};
use crate::errors::Result;

/// Catalogue metadata for the song we want to download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration: Option<u64>, // seconds
    pub explicit: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artists: Vec<String>) -> Self {
        let id = id.into();
        Self {
            url: id.clone(),
            id,
            title: title.into(),
            artists,
            album: None,
            duration: None,
            explicit: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = explicit;
        self
    }

    /// "Artist X, Artist Y - Title"
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artists.join(", "), self.title)
    }
}

/// Turns a user supplied URL (or catalogue id) into track metadata.
#[async_trait::async_trait]
pub trait TrackResolver {
    async fn resolve(&self, url: &str) -> Result<Track>;
    fn get_name(&self) -> &str;
}
