//! Parallel build engine
//!
//! Drives a [`ConfigBuilder`] over the resolved fabric hostvars: validate
//! every host, generate fabric facts once, then build and write per-host
//! artifacts on a bounded blocking-task pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use minijinja::{Environment, UndefinedBehavior};
use serde_yaml::{Mapping, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use avdbuild_builder::{switch_facts, ConfigBuilder, Hostvars};
use avdbuild_core::template;

use crate::error::Result;

/// Where artifacts go and how the run behaves.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Directory for rendered device configs (`<host>.cfg`)
    pub configs_path: PathBuf,

    /// Directory for structured configs (`<host>.yml`)
    pub structured_configs_path: PathBuf,

    /// Optional path for the combined fabric facts file
    pub avd_facts_path: Option<PathBuf>,

    /// Maximum number of hosts processed concurrently
    pub max_workers: usize,

    /// Fail the run on the first validation or build error
    pub strict: bool,
}

/// A host that was skipped in a non-strict run, with the failure message.
#[derive(Debug, Clone)]
pub struct HostFailure {
    /// The host that failed
    pub hostname: String,
    /// What went wrong
    pub message: String,
}

/// Outcome of a build run.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Hosts whose artifacts were written, sorted
    pub built: Vec<String>,

    /// Hosts skipped because of a non-strict failure, sorted
    pub skipped: Vec<HostFailure>,
}

/// Build orchestrator: one instance per run.
pub struct BuildEngine {
    builder: Arc<dyn ConfigBuilder>,
    options: BuildOptions,
}

impl BuildEngine {
    /// Create an engine around a configuration builder.
    pub fn new(builder: Arc<dyn ConfigBuilder>, options: BuildOptions) -> Self {
        Self { builder, options }
    }

    /// Run the full build: validate all fabric hosts, generate facts, then
    /// build every host in `target_hosts`.
    ///
    /// `all_hostvars` covers the whole fabric group (facts need every host);
    /// `target_hosts` is the limit-filtered subset that gets artifacts.
    pub async fn build(
        &self,
        all_hostvars: Hostvars,
        target_hosts: &[String],
    ) -> Result<BuildReport> {
        let total = Instant::now();

        self.validate_all(&all_hostvars).await?;

        let facts = self.generate_facts(&all_hostvars).await?;

        let targets: Hostvars = all_hostvars
            .into_iter()
            .filter(|(hostname, _)| target_hosts.contains(hostname))
            .collect();

        let report = self.build_all(targets, Arc::new(facts)).await?;

        tracing::debug!("Total build time: {:.3}s", total.elapsed().as_secs_f64());
        tracing::debug!("Processed {} hosts", report.built.len());
        Ok(report)
    }

    fn workers(&self) -> usize {
        self.options.max_workers.max(1)
    }

    /// Validate the inputs of every fabric host in parallel. Failures are
    /// logged per host; under strict mode the first failed host aborts.
    async fn validate_all(&self, all_hostvars: &Hostvars) -> Result<()> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers()));
        let mut tasks = JoinSet::new();

        for (hostname, hostvars) in all_hostvars {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            let builder = Arc::clone(&self.builder);
            let hostname = hostname.clone();
            let hostvars = hostvars.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let result = builder.validate_inputs(&hostname, &hostvars);
                result.log(&hostname);
                (hostname, result.failed())
            });
        }

        let mut first_failure: Option<String> = None;
        while let Some(joined) = tasks.join_next().await {
            let (hostname, failed) = joined.context("validation worker panicked")?;
            if failed && first_failure.is_none() {
                first_failure = Some(hostname);
            }
        }

        tracing::debug!(
            "Validate inputs time: {:.3}s",
            start.elapsed().as_secs_f64()
        );

        match first_failure {
            Some(hostname) if self.options.strict => {
                Err(anyhow!("{hostname} validate_inputs failed"))
            }
            _ => Ok(()),
        }
    }

    /// Generate fabric facts from all hostvars and write the facts file if
    /// one was requested. Facts errors are always fatal, strict or not.
    async fn generate_facts(&self, all_hostvars: &Hostvars) -> Result<Value> {
        let start = Instant::now();

        let builder = Arc::clone(&self.builder);
        let hostvars = all_hostvars.clone();
        let facts = tokio::task::spawn_blocking(move || builder.fabric_facts(&hostvars))
            .await
            .context("facts worker panicked")?
            .context("fabric facts generation failed")?;

        if let Some(path) = &self.options.avd_facts_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_yaml::to_string(&facts)?)
                .with_context(|| format!("cannot write facts to {}", path.display()))?;
        }

        tracing::debug!(
            "Generate facts time: {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(facts)
    }

    /// Build and write artifacts for every target host on the bounded pool.
    async fn build_all(&self, targets: Hostvars, facts: Arc<Value>) -> Result<BuildReport> {
        let start = Instant::now();
        std::fs::create_dir_all(&self.options.configs_path)?;
        std::fs::create_dir_all(&self.options.structured_configs_path)?;

        let semaphore = Arc::new(Semaphore::new(self.workers()));
        let mut tasks = JoinSet::new();

        for (hostname, hostvars) in targets {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            let builder = Arc::clone(&self.builder);
            let facts = Arc::clone(&facts);
            let configs_path = self.options.configs_path.clone();
            let structured_configs_path = self.options.structured_configs_path.clone();
            let strict = self.options.strict;
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let outcome = build_and_write_device_config(
                    builder.as_ref(),
                    &hostname,
                    &hostvars,
                    &facts,
                    &structured_configs_path,
                    &configs_path,
                    strict,
                );
                (hostname, outcome)
            });
        }

        let mut report = BuildReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (hostname, outcome) = joined.context("build worker panicked")?;
            match outcome {
                Ok(()) => report.built.push(hostname),
                Err(message) if self.options.strict => {
                    tasks.abort_all();
                    return Err(anyhow!("{hostname}: {message}"));
                }
                Err(message) => {
                    tracing::error!("{hostname}: {message}, skipping host");
                    report.skipped.push(HostFailure { hostname, message });
                }
            }
        }

        report.built.sort();
        report.skipped.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        tracing::debug!(
            "Build and write device config time: {:.3}s",
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}

/// Build one host and write its two artifacts.
///
/// Errors are flattened to plain strings so every failure, whatever its
/// source type, crosses the worker task boundary the same way.
fn build_and_write_device_config(
    builder: &dyn ConfigBuilder,
    hostname: &str,
    hostvars: &Mapping,
    facts: &Value,
    structured_configs_path: &Path,
    configs_path: &Path,
    strict: bool,
) -> std::result::Result<(), String> {
    let structured = builder
        .structured_config(hostname, hostvars, facts)
        .map_err(|e| e.to_string())?;

    let own_facts = switch_facts(facts, hostname).map_err(|e| e.to_string())?;
    let structured = interpolate_structured(&structured, own_facts);

    let yaml = serde_yaml::to_string(&structured).map_err(|e| e.to_string())?;
    std::fs::write(structured_configs_path.join(format!("{hostname}.yml")), yaml)
        .map_err(|e| e.to_string())?;

    let result = builder.validate_structured_config(hostname, &structured);
    result.log(hostname);
    if result.failed() && strict {
        return Err("validate_structured_config failed".to_string());
    }

    let config = builder.device_config(&structured).map_err(|e| e.to_string())?;
    std::fs::write(configs_path.join(format!("{hostname}.cfg")), config)
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// One more template pass over the structured config, with the host's own
/// switch facts and the structured config itself as context.
fn interpolate_structured(structured: &Value, own_facts: &Value) -> Value {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    let mut context = Mapping::new();
    if let Some(facts) = own_facts.as_mapping() {
        for (k, v) in facts {
            context.insert(k.clone(), v.clone());
        }
    }
    if let Some(config) = structured.as_mapping() {
        for (k, v) in config {
            context.insert(k.clone(), v.clone());
        }
    }

    let context = minijinja::Value::from_serialize(&context);
    let mut changed = false;
    template::render_value(&env, structured, &context, &mut changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avdbuild_builder::EosBuilder;
    use std::collections::BTreeMap;

    fn hostvars(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn fabric_hostvars() -> Hostvars {
        let mut all = BTreeMap::new();
        all.insert(
            "dc1-spine1".to_string(),
            hostvars("type: spine\nid: 1\nbgp_as: 65001\nloopback_ipv4_pool: 10.255.0.0/24\n"),
        );
        all.insert(
            "dc1-leaf1".to_string(),
            hostvars("type: l3leaf\nid: 11\nbgp_as: 65101\nloopback_ipv4_pool: 10.255.0.0/24\n"),
        );
        all.insert(
            "dc1-leaf2".to_string(),
            hostvars("type: l2leaf\nid: 12\n"),
        );
        all
    }

    fn options(root: &Path, strict: bool) -> BuildOptions {
        BuildOptions {
            configs_path: root.join("configs"),
            structured_configs_path: root.join("structured_configs"),
            avd_facts_path: None,
            max_workers: 4,
            strict,
        }
    }

    fn engine(root: &Path, strict: bool) -> BuildEngine {
        BuildEngine::new(Arc::new(EosBuilder::new()), options(root, strict))
    }

    fn all_hosts(hostvars: &Hostvars) -> Vec<String> {
        hostvars.keys().cloned().collect()
    }

    #[tokio::test]
    async fn test_build_writes_artifacts_per_host() {
        let dir = tempfile::tempdir().unwrap();
        let all = fabric_hostvars();
        let targets = all_hosts(&all);

        let report = engine(dir.path(), false).build(all, &targets).await.unwrap();

        assert_eq!(report.built, vec!["dc1-leaf1", "dc1-leaf2", "dc1-spine1"]);
        assert!(report.skipped.is_empty());
        for host in &report.built {
            assert!(dir.path().join(format!("configs/{host}.cfg")).exists());
            assert!(dir
                .path()
                .join(format!("structured_configs/{host}.yml"))
                .exists());
        }
    }

    #[tokio::test]
    async fn test_targets_restrict_output() {
        let dir = tempfile::tempdir().unwrap();
        let all = fabric_hostvars();
        let targets = vec!["dc1-leaf1".to_string()];

        let report = engine(dir.path(), false).build(all, &targets).await.unwrap();

        assert_eq!(report.built, vec!["dc1-leaf1"]);
        assert!(dir.path().join("configs/dc1-leaf1.cfg").exists());
        assert!(!dir.path().join("configs/dc1-spine1.cfg").exists());
    }

    #[tokio::test]
    async fn test_strict_validation_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut all = fabric_hostvars();
        all.insert("dc1-bad1".to_string(), hostvars("id: 99\n"));
        let targets = all_hosts(&all);

        let err = engine(dir.path(), true)
            .build(all, &targets)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("validate_inputs failed"));
    }

    #[tokio::test]
    async fn test_non_strict_skips_failing_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut all = fabric_hostvars();
        // passes input validation but has no loopback pool, so the
        // structured config step fails
        all.insert(
            "dc1-leaf9".to_string(),
            hostvars("type: l3leaf\nid: 19\nbgp_as: 65109\n"),
        );
        let targets = all_hosts(&all);

        let report = engine(dir.path(), false).build(all, &targets).await.unwrap();

        assert_eq!(report.built.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].hostname, "dc1-leaf9");
        assert!(!dir.path().join("configs/dc1-leaf9.cfg").exists());
    }

    #[tokio::test]
    async fn test_duplicate_node_id_is_always_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut all = fabric_hostvars();
        all.insert(
            "dc1-clone".to_string(),
            hostvars("type: l3leaf\nid: 11\nbgp_as: 65111\nloopback_ipv4_pool: 10.255.0.0/24\n"),
        );
        let targets = all_hosts(&all);

        let err = engine(dir.path(), false)
            .build(all, &targets)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fabric facts generation failed"));
    }

    #[tokio::test]
    async fn test_facts_file_written_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), false);
        opts.avd_facts_path = Some(dir.path().join("facts/avd_facts.yml"));
        let engine = BuildEngine::new(Arc::new(EosBuilder::new()), opts);

        let all = fabric_hostvars();
        let targets = all_hosts(&all);
        engine.build(all, &targets).await.unwrap();

        let facts: Value = serde_yaml::from_str(
            &std::fs::read_to_string(dir.path().join("facts/avd_facts.yml")).unwrap(),
        )
        .unwrap();
        assert!(facts.get("avd_switch_facts").is_some());
    }

    #[tokio::test]
    async fn test_worker_count_does_not_change_output() {
        let dir_serial = tempfile::tempdir().unwrap();
        let dir_parallel = tempfile::tempdir().unwrap();

        let mut opts = options(dir_serial.path(), false);
        opts.max_workers = 1;
        let serial = BuildEngine::new(Arc::new(EosBuilder::new()), opts);

        let mut opts = options(dir_parallel.path(), false);
        opts.max_workers = 8;
        let parallel = BuildEngine::new(Arc::new(EosBuilder::new()), opts);

        let all = fabric_hostvars();
        let targets = all_hosts(&all);
        serial.build(all.clone(), &targets).await.unwrap();
        parallel.build(all, &targets).await.unwrap();

        for host in targets {
            let a = std::fs::read(dir_serial.path().join(format!("configs/{host}.cfg"))).unwrap();
            let b =
                std::fs::read(dir_parallel.path().join(format!("configs/{host}.cfg"))).unwrap();
            assert_eq!(a, b, "{host} config differs between worker counts");
        }
    }

    #[test]
    fn test_interpolate_structured_uses_switch_facts() {
        let own_facts: Value =
            serde_yaml::from_str("id: 1\nloopback_ipv4: 10.255.0.1\n").unwrap();
        let structured: Value = serde_yaml::from_str(
            "hostname: spine1\nbanner: \"node {{ id }} at {{ loopback_ipv4 }}\"\n",
        )
        .unwrap();

        let rendered = interpolate_structured(&structured, &own_facts);
        assert_eq!(rendered["banner"], Value::from("node 1 at 10.255.0.1"));
    }
}
