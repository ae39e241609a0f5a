use crate::stack::{Stack, StackValues, DEFAULT_MODULE};
use crate::tracking::TrackerOptions;
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Processing settings stored as JSON
///
/// Missing fields take their defaults, so a file may only name what it changes.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Segmentation stack
    pub module: String,
    /// Framerate used for image sequences, `None` keeps the source's own rate
    pub framerate: Option<f64>,
    /// Threads used for feature extraction
    pub threads: usize,
    /// Stage values, `stage -> parameter -> value`
    pub values: StackValues,
    pub tracker: TrackerOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            framerate: None,
            threads: num_cpus::get(),
            values: StackValues::default(),
            tracker: TrackerOptions::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Unable to read settings `{}`", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("Unable to parse settings `{}`", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Unable to write settings `{}`", path.display()))?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Builds the configured stack with the stored values applied
    pub fn stack(&self) -> Result<Stack> {
        let mut stack = Stack::new(&self.module)?;
        stack.set_values(&self.values)?;
        Ok(stack)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::stack::params::ParamValue;
    use crate::test_stuff::temp_dir;
    use crate::tracking::PositionalMetric;
    use crate::Errors;
    use std::collections::BTreeMap;

    #[test]
    fn save_and_load() {
        let dir = temp_dir("settings");
        let file = dir.join("settings.json");

        let mut s = Settings::default();
        s.module = "simple".into();
        s.framerate = Some(12.5);
        s.tracker.metric = PositionalMetric::Mahalanobis;
        s.values.insert(
            "postprocessing".into(),
            BTreeMap::from([("min_size".to_string(), ParamValue::Float(2.5))]),
        );
        s.save(&file).unwrap();

        let loaded = Settings::load(&file).unwrap();
        assert_eq!(loaded, s);
        let stack = loaded.stack().unwrap();
        assert_eq!(stack.module(), "simple");
        assert_eq!(
            stack.value("postprocessing", "min_size").unwrap(),
            &ParamValue::Float(2.5)
        );
    }

    #[test]
    fn partial_file() {
        let s: Settings = serde_json::from_str(r#"{"module": "short"}"#).unwrap();
        assert_eq!(s.module, "short");
        assert_eq!(s.tracker.max_idle_frames, 5);
        assert!(s.threads > 0);
    }

    #[test]
    fn bad_files() {
        let dir = temp_dir("bad-settings");
        let missing = dir.join("missing.json");
        assert!(Settings::load(&missing).is_err());

        let broken = dir.join("broken.json");
        std::fs::write(&broken, "{ module: ").unwrap();
        assert!(Settings::load(&broken).is_err());

        let s = Settings {
            module: "watershed".into(),
            ..Settings::default()
        };
        let err = s.stack().unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::UnknownModule("watershed".into()))
        );
    }
}
