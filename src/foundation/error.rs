pub type TrackcastResult<T> = Result<T, TrackcastError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackcastError {
    /// Bad user input: malformed directives, unreadable files, too-few points.
    /// Always surfaced before any expensive work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tile acquisition failure (network, decode); recoverable per tile.
    #[error("tile error: {0}")]
    Tile(String),

    /// A fetched tile did not match the pixel size the style promises in
    /// high-resolution mode. Systematic, so it aborts tile acquisition for
    /// the whole run instead of degrading per tile.
    #[error("tile resolution error: {0}")]
    TileResolution(String),

    /// Encoder setup or external-process failure.
    #[error("encode error: {0}")]
    Encode(String),

    /// Render/encode pipeline failure, including the frame watchdog.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrackcastError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn tile(msg: impl Into<String>) -> Self {
        Self::Tile(msg.into())
    }

    pub fn tile_resolution(msg: impl Into<String>) -> Self {
        Self::TileResolution(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            TrackcastError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(TrackcastError::tile("x").to_string().contains("tile error:"));
        assert!(
            TrackcastError::encode("x")
                .to_string()
                .contains("encode error:")
        );
        assert!(
            TrackcastError::pipeline("x")
                .to_string()
                .contains("pipeline error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = TrackcastError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
