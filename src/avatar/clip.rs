use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Symbolic names for the avatar clips the engine drives.
pub mod clips {
    pub const IDLE_LOOP: &str = "idle_loop";
    pub const SPEAKING_INTRO: &str = "speaking_intro";
    pub const SPEAKING_LOOP: &str = "speaking_loop";
    pub const SPEAKING_OUTRO: &str = "speaking_outro";
    pub const LISTENING_INTRO: &str = "listening_intro";
    pub const LISTENING_LOOP: &str = "listening_loop";
    pub const LISTENING_OUTRO: &str = "listening_outro";
}

/// One resolvable avatar clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub name: String,
    pub path: PathBuf,
    pub duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    fallback: Option<String>,
    clips: HashMap<String, ManifestClip>,
}

#[derive(Debug, Deserialize)]
struct ManifestClip {
    file: String,
    duration_ms: u64,
}

/// Maps symbolic clip names to asset files via `clips.json` in the assets
/// directory. Unknown names and missing files resolve to the fallback clip;
/// no error ever reaches the caller.
pub struct ClipLibrary {
    clips: HashMap<String, Clip>,
    fallback: Clip,
}

impl ClipLibrary {
    pub fn load(assets_dir: impl AsRef<Path>) -> Self {
        let assets_dir = assets_dir.as_ref();
        let built_in_fallback = Clip {
            name: "fallback".to_string(),
            path: assets_dir.join("fallback.mp4"),
            duration_ms: 3000,
        };

        let manifest_path = assets_dir.join("clips.json");
        let manifest: Manifest = match std::fs::read(&manifest_path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(anyhow::Error::from))
        {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(
                    "No usable clip manifest at {} ({}), all clips resolve to fallback",
                    manifest_path.display(),
                    e
                );
                return Self {
                    clips: HashMap::new(),
                    fallback: built_in_fallback,
                };
            }
        };

        let clips: HashMap<String, Clip> = manifest
            .clips
            .into_iter()
            .map(|(name, entry)| {
                let clip = Clip {
                    name: name.clone(),
                    path: assets_dir.join(entry.file),
                    duration_ms: entry.duration_ms,
                };
                (name, clip)
            })
            .collect();

        let fallback = manifest
            .fallback
            .as_deref()
            .and_then(|name| clips.get(name).cloned())
            .unwrap_or(built_in_fallback);

        info!(
            "Clip library loaded: {} clips, fallback '{}'",
            clips.len(),
            fallback.name
        );

        Self { clips, fallback }
    }

    /// Resolve a clip name. Degrades to the fallback clip silently.
    pub fn resolve(&self, name: &str) -> Clip {
        match self.clips.get(name) {
            Some(clip) if clip.path.exists() => clip.clone(),
            Some(clip) => {
                debug!(
                    "Clip file missing for '{}' ({}), using fallback",
                    name,
                    clip.path.display()
                );
                self.fallback.clone()
            }
            None => {
                debug!("Unknown clip '{}', using fallback", name);
                self.fallback.clone()
            }
        }
    }

    pub fn fallback(&self) -> &Clip {
        &self.fallback
    }
}
