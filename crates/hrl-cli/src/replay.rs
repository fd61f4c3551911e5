//! Environment backed by a JSON-lines observation recording

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use hrl_core::{HrlError, Observation, PrimitiveAction, Result};
use hrl_engine::Environment;

/// Plays recorded observations back in order, ignoring the issued actions
/// except for counting them
pub struct ReplayEnvironment {
    pending: VecDeque<Observation>,
    issued: usize,
}

impl ReplayEnvironment {
    pub fn from_jsonl(text: &str) -> Result<Self> {
        let mut pending = VecDeque::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let obs: Observation = serde_json::from_str(line).map_err(|e| {
                HrlError::Serialization(format!("line {}: {}", line_no + 1, e))
            })?;
            pending.push_back(obs);
        }
        Ok(Self { pending, issued: 0 })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HrlError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_jsonl(&text)
    }

    /// Whether another episode can start
    pub fn has_episode(&self) -> bool {
        self.pending.front().is_some_and(|obs| obs.first)
    }

    /// Primitive actions received so far
    pub fn issued(&self) -> usize {
        self.issued
    }

    fn next(&mut self) -> Result<Observation> {
        self.pending
            .pop_front()
            .ok_or_else(|| HrlError::Environment("recording ended mid-episode".to_string()))
    }
}

#[async_trait]
impl Environment for ReplayEnvironment {
    async fn reset(&mut self) -> Result<Observation> {
        let obs = self.next()?;
        if !obs.first {
            return Err(HrlError::Environment(
                "recorded episode does not start with a first observation".to_string(),
            ));
        }
        Ok(obs)
    }

    async fn step(&mut self, action: PrimitiveAction) -> Result<Observation> {
        self.issued += 1;
        debug!("replay ignores {}", action);
        self.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(first: bool, last: bool, reward: f64) -> String {
        format!(
            r#"{{"First":{},"Last":{},"Reward":{},"Score":0.0,"Player":{{"Minerals":0,"Vespene":0}},"Screen":{{}},"Minimap":{{}},"AvailableActions":[],"SelectedUnits":[],"OwnBuildings":{{}}}}"#,
            first, last, reward
        )
    }

    #[test]
    fn test_parses_recording() {
        let text = [line(true, false, 0.0), String::new(), line(false, true, 1.0)].join("\n");
        let env = ReplayEnvironment::from_jsonl(&text).unwrap();
        assert!(env.has_episode());
        assert_eq!(env.pending.len(), 2);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let text = format!("{}\nnot json", line(true, false, 0.0));
        let err = ReplayEnvironment::from_jsonl(&text).err().unwrap();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_reset_requires_first_observation() {
        let mut env = ReplayEnvironment::from_jsonl(&line(false, false, 0.0)).unwrap();
        assert!(!env.has_episode());
        let err = tokio_test::block_on(env.reset()).unwrap_err();
        assert!(matches!(err, HrlError::Environment(_)));
    }

    #[test]
    fn test_step_counts_and_advances() {
        let text = [line(true, false, 0.0), line(false, true, -1.0)].join("\n");
        let mut env = ReplayEnvironment::from_jsonl(&text).unwrap();
        tokio_test::block_on(async {
            assert!(env.reset().await.unwrap().first);
            assert!(env.step(PrimitiveAction::no_op()).await.unwrap().last);
            assert!(env.step(PrimitiveAction::no_op()).await.is_err());
        });
        assert_eq!(env.issued(), 2);
    }
}
