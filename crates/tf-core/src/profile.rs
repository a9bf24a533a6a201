//! Output profiles and the static profile table.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named output configuration: target resolution and video bitrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile identifier used in requests (e.g. `"720p"`).
    pub name: String,
    /// Target frame height in pixels; width follows the source aspect ratio.
    pub height: u32,
    /// Target video bitrate in ffmpeg notation (e.g. `"2800k"`).
    pub bitrate: String,
}

impl Profile {
    pub fn new(name: impl Into<String>, height: u32, bitrate: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            height,
            bitrate: bitrate.into(),
        }
    }

    /// Reject profiles that cannot produce an encode.
    pub fn check(&self) -> Result<()> {
        let problem = if self.name.trim().is_empty() {
            "empty name"
        } else if self.height == 0 {
            "height 0"
        } else if self.bitrate.trim().is_empty() {
            "empty bitrate"
        } else {
            return Ok(());
        };
        Err(Error::Configuration(format!(
            "invalid profile '{}': {problem}",
            self.name
        )))
    }
}

/// The built-in profile table.
pub fn default_profiles() -> Vec<Profile> {
    vec![
        Profile::new("360p", 360, "800k"),
        Profile::new("480p", 480, "1400k"),
        Profile::new("720p", 720, "2800k"),
        Profile::new("1080p", 1080, "5000k"),
    ]
}

/// Lookup table from profile name to [`Profile`].
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: Vec<Profile>,
}

impl ProfileTable {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self { profiles }
    }

    /// Look up a profile by name. The first entry with a matching name wins.
    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown profile '{name}' (known: {})",
                    self.names().join(", ")
                ))
            })
    }

    /// Resolve a requested profile list, rejecting empty, unknown, invalid
    /// and duplicate entries.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Profile>> {
        if names.is_empty() {
            return Err(Error::Configuration(
                "at least one output profile is required".into(),
            ));
        }

        let mut resolved: Vec<Profile> = Vec::with_capacity(names.len());
        for name in names {
            if resolved.iter().any(|p| &p.name == name) {
                return Err(Error::Configuration(format!(
                    "profile '{name}' requested more than once"
                )));
            }
            let profile = self.get(name)?;
            profile.check()?;
            resolved.push(profile.clone());
        }
        Ok(resolved)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::new(default_profiles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_lookup() {
        let table = ProfileTable::default();
        let p = table.get("720p").unwrap();
        assert_eq!(p.height, 720);
        assert_eq!(p.bitrate, "2800k");
    }

    #[test]
    fn unknown_profile_is_configuration_error() {
        let table = ProfileTable::default();
        let err = table.get("4k").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("4k"));
    }

    #[test]
    fn resolve_preserves_request_order() {
        let table = ProfileTable::default();
        let names = vec!["720p".to_string(), "480p".to_string()];
        let resolved = table.resolve(&names).unwrap();
        assert_eq!(resolved[0].name, "720p");
        assert_eq!(resolved[1].name, "480p");
    }

    #[test]
    fn resolve_rejects_empty_and_duplicates() {
        let table = ProfileTable::default();
        assert!(table.resolve(&[]).is_err());

        let dup = vec!["480p".to_string(), "480p".to_string()];
        assert!(matches!(table.resolve(&dup), Err(Error::Configuration(_))));
    }

    #[test]
    fn resolve_fails_on_any_unknown() {
        let table = ProfileTable::default();
        let names = vec!["480p".to_string(), "8k".to_string()];
        assert!(table.resolve(&names).is_err());
    }

    #[test]
    fn resolve_rejects_unusable_profiles() {
        let table = ProfileTable::new(vec![
            Profile::new("flat", 0, "500k"),
            Profile::new("nobits", 480, " "),
            Profile::new("", 480, "500k"),
            Profile::new("ok", 480, "500k"),
        ]);

        for name in ["flat", "nobits", ""] {
            let err = table.resolve(&[name.to_string(), "ok".to_string()]).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{name}: {err}");
        }
        let err = table.resolve(&["flat".to_string()]).unwrap_err();
        assert!(err.to_string().contains("height 0"));

        assert_eq!(table.resolve(&["ok".to_string()]).unwrap().len(), 1);
    }
}
