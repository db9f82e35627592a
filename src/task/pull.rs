//! PullTask (§4.4): login, then stream an image pull, aggregating
//! per-layer progress into a single running percentage (S6).

use std::collections::HashMap;

use futures_util::StreamExt;

use crate::error::{Error, Result};
use crate::progress::OutputSink;
use crate::ship::Ship;
use crate::task::login::{resolve_registry, LoginTask, RegistryCredentials};

/// Running aggregate of a pull's per-layer progress.
#[derive(Debug, Default, Clone)]
pub struct PullProgress {
    per_layer: HashMap<String, f64>,
}

impl PullProgress {
    fn record(&mut self, layer: &str, percent: f64) {
        self.per_layer.insert(layer.to_string(), percent);
    }

    /// Running average across all known layers (0.0 if none yet).
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.per_layer.is_empty() {
            return 0.0;
        }
        self.per_layer.values().sum::<f64>() / self.per_layer.len() as f64
    }
}

/// Login then stream an `/images/create` pull, reporting aggregate progress.
pub struct PullTask<'a> {
    ship: &'a Ship,
    registries: &'a HashMap<String, RegistryCredentials>,
}

impl<'a> PullTask<'a> {
    /// Build a PullTask against `ship`.
    #[must_use]
    pub fn new(ship: &'a Ship, registries: &'a HashMap<String, RegistryCredentials>) -> Self {
        Self { ship, registries }
    }

    /// Run LoginTask, then pull `image:tag`. Whether the pull is
    /// insecure is derived here from the scheme of the registry
    /// configured for `image` (`http` -> insecure), mirroring
    /// `LoginTask`'s own registry resolution.
    pub async fn run(&self, image: &str, tag: &str, sink: &dyn OutputSink) -> Result<PullProgress> {
        sink.reset();
        LoginTask::new(self.ship, self.registries).run(image).await?;

        let insecure = resolve_registry(self.registries, image).is_some_and(|creds| {
            url::Url::parse(&creds.registry).is_ok_and(|u| u.scheme() == "http")
        });

        let mut stream = Box::pin(self.ship.pull(image, tag, insecure));
        let mut progress = PullProgress::default();

        while let Some(event) = stream.next().await {
            let event = match event {
                Ok(v) => v,
                Err(e) => return Err(Error::orchestration(format!("pull stream failed: {e}"))),
            };

            if let Some(error_obj) = event.get("error") {
                let message = error_obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown pull error");
                return Err(Error::orchestration(format!("image pull failed: {message}")));
            }

            let Some(layer) = event.get("id").and_then(|v| v.as_str()) else {
                continue; // Malformed progress event — skip, the pull continues.
            };

            let percent = match event.get("status").and_then(|v| v.as_str()) {
                Some("Download complete") => Some(100.0),
                _ => event.get("progressDetail").and_then(|detail| {
                    let current = detail.get("current")?.as_f64()?;
                    let total = detail.get("total")?.as_f64()?;
                    if total <= 0.0 {
                        None
                    } else {
                        Some(100.0 * current / total)
                    }
                }),
            };

            if let Some(percent) = percent {
                progress.record(layer, percent);
                sink.pending(&format!("{:.1}%", progress.average()));
            }
        }

        sink.commit(&format!("{:.1}%", progress.average()));
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(progress: &mut PullProgress, event: &serde_json::Value) {
        let layer = event.get("id").and_then(|v| v.as_str()).unwrap();
        let percent = match event.get("status").and_then(|v| v.as_str()) {
            Some("Download complete") => Some(100.0),
            _ => event.get("progressDetail").and_then(|detail| {
                let current = detail.get("current")?.as_f64()?;
                let total = detail.get("total")?.as_f64()?;
                Some(100.0 * current / total)
            }),
        };
        if let Some(p) = percent {
            progress.record(layer, p);
        }
    }

    #[test]
    fn test_pull_progress_aggregation_scenario_s6() {
        let mut progress = PullProgress::default();
        apply(
            &mut progress,
            &json!({"id": "A", "progressDetail": {"current": 50, "total": 100}}),
        );
        apply(&mut progress, &json!({"id": "B", "status": "Download complete"}));
        assert!((progress.average() - 75.0).abs() < f64::EPSILON);

        apply(
            &mut progress,
            &json!({"id": "A", "progressDetail": {"current": 100, "total": 100}}),
        );
        assert!((progress.average() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pull_progress_empty_is_zero() {
        assert_eq!(PullProgress::default().average(), 0.0);
    }
}
