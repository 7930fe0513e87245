//! CSI Upgrade Validator
//!
//! Deploys a released CSI plugin, binds a workload to a volume, upgrades the
//! plugin in place to the working-tree build and checks the data, clone and
//! resize paths still work.
//!
//! Runs against the cluster in the current kubeconfig, or with `--standalone`
//! against an in-process simulated platform.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_upgrade_validator::{
    Collaborators, DeployerConfig, DriverProfile, KubeGateway, KubectlDeployer,
    ScenarioReport, SimulatedConfig, SimulatedPlatform, UpgradeConfig, UpgradeSequencer,
    UpgradeSettings, VersionInfo, YamlTemplateLoader,
};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

/// CSI Upgrade Validator - in-place upgrade checks for CSI storage plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML settings file; flags override its values
    #[arg(long, env = "UPGRADE_CONFIG")]
    config: Option<PathBuf>,

    /// Run the upgrade scenarios
    #[arg(long, env = "UPGRADE_TESTING")]
    upgrade_testing: bool,

    /// Run the RBD scenario
    #[arg(long, env = "TEST_RBD")]
    test_rbd: Option<bool>,

    /// Run the CephFS scenario
    #[arg(long, env = "TEST_CEPHFS")]
    test_cephfs: Option<bool>,

    /// Release to upgrade from
    #[arg(long, env = "UPGRADE_VERSION")]
    upgrade_version: Option<String>,

    /// Budget for every convergence wait, in minutes
    #[arg(long, env = "DEPLOY_TIMEOUT")]
    deploy_timeout: Option<u64>,

    /// Seconds between polls
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Namespace the plugin is deployed into
    #[arg(long, env = "CEPHCSI_NAMESPACE")]
    cephcsi_namespace: Option<String>,

    /// Directory holding the per-driver claim, pod and snapshot templates
    #[arg(long, env = "TEMPLATE_ROOT")]
    template_root: Option<PathBuf>,

    /// Checkout holding the new plugin version
    #[arg(long, env = "WORKING_TREE")]
    working_tree: Option<PathBuf>,

    /// Repository releases are cloned from
    #[arg(long, env = "RELEASE_REPO")]
    release_repo: Option<String>,

    /// Directory release checkouts are cached in
    #[arg(long, env = "RELEASE_CACHE_DIR")]
    release_cache_dir: Option<PathBuf>,

    /// kubectl binary
    #[arg(long, env = "KUBECTL")]
    kubectl: Option<String>,

    /// Size of the primary claim
    #[arg(long, env = "CLAIM_SIZE")]
    claim_size: Option<String>,

    /// Size the primary claim is expanded to
    #[arg(long, env = "EXPAND_SIZE")]
    expand_size: Option<String>,

    /// Name of the marker file written into the volume
    #[arg(long, env = "MARKER_FILE")]
    marker_file: Option<String>,

    /// Run in standalone mode (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Platform version reported in standalone mode
    #[arg(long, env = "SIMULATED_VERSION", default_value = "1.29")]
    simulated_version: String,

    /// Report format
    #[arg(long, env = "REPORT_FORMAT", value_enum, default_value = "text")]
    report: ReportFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Settings file overlaid with the flags that were given
    fn settings(&self) -> anyhow::Result<UpgradeSettings> {
        let mut settings = match &self.config {
            Some(path) => UpgradeSettings::from_file(path)
                .with_context(|| format!("loading settings from {}", path.display()))?,
            None => UpgradeSettings::default(),
        };

        settings.upgrade_testing |= self.upgrade_testing;
        if let Some(v) = self.test_rbd {
            settings.test_rbd = v;
        }
        if let Some(v) = self.test_cephfs {
            settings.test_cephfs = v;
        }
        if let Some(v) = &self.upgrade_version {
            settings.upgrade_version = v.clone();
        }
        if let Some(v) = self.deploy_timeout {
            settings.deploy_timeout = v;
        }
        if let Some(v) = self.poll_interval {
            settings.poll_interval = v;
        }
        if let Some(v) = &self.cephcsi_namespace {
            settings.ceph_csi_namespace = v.clone();
        }
        if let Some(v) = &self.template_root {
            settings.template_root = v.clone();
        }
        if let Some(v) = &self.working_tree {
            settings.working_tree = v.clone();
        }
        if let Some(v) = &self.release_repo {
            settings.release_repo = v.clone();
        }
        if let Some(v) = &self.release_cache_dir {
            settings.release_cache_dir = v.clone();
        }
        if let Some(v) = &self.kubectl {
            settings.kubectl = v.clone();
        }
        if let Some(v) = &self.claim_size {
            settings.claim_size = v.clone();
        }
        if let Some(v) = &self.expand_size {
            settings.expand_size = v.clone();
        }
        if let Some(v) = &self.marker_file {
            settings.marker_file = v.clone();
        }
        Ok(settings)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let config = args.settings()?.validate()?;

    info!("Starting CSI Upgrade Validator");
    info!("  Version: {}", csi_upgrade_validator::VERSION);
    info!("  Upgrade testing: {}", config.upgrade_testing);
    info!("  Upgrade from: {}", config.upgrade_version);
    info!("  Plugin namespace: {}", config.plugin_namespace);
    info!("  Standalone mode: {}", args.standalone);

    let scenarios = config.scenarios();
    if scenarios.is_empty() {
        info!("Upgrade testing disabled or no driver selected, nothing to do");
        return Ok(());
    }

    let simulated = if args.standalone {
        let version = VersionInfo::parse(&args.simulated_version)?;
        Some(Arc::new(SimulatedPlatform::new(SimulatedConfig {
            version,
            ..Default::default()
        })))
    } else {
        None
    };
    let gateway = match &simulated {
        Some(_) => None,
        None => Some(Arc::new(
            KubeGateway::try_default()
                .await
                .context("connecting to Kubernetes")?,
        )),
    };

    let mut reports = Vec::new();
    for profile in scenarios {
        let ports = match (&simulated, &gateway) {
            (Some(platform), _) => Collaborators::standalone(platform.clone()),
            (None, Some(gateway)) => Collaborators {
                gateway: gateway.clone(),
                executor: gateway.clone(),
                templates: Arc::new(YamlTemplateLoader::new()),
                deployer: Arc::new(KubectlDeployer::new(deployer_config(&config, &profile))),
            },
            (None, None) => bail!("no platform available"),
        };

        let report = UpgradeSequencer::new(config.clone(), profile, ports)
            .run()
            .await;
        print_report(&report, args.report)?;
        reports.push(report);
    }

    let failed: Vec<String> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.driver.to_string())
        .collect();
    if !failed.is_empty() {
        error!("Upgrade validation failed for: {}", failed.join(", "));
        bail!("{} of {} scenario(s) failed", failed.len(), reports.len());
    }

    info!("All upgrade scenarios passed");
    Ok(())
}

fn deployer_config(config: &UpgradeConfig, profile: &DriverProfile) -> DeployerConfig {
    DeployerConfig {
        kubectl: config.kubectl.clone(),
        release_repo: config.release_repo.clone(),
        release_cache: config.release_cache_dir.clone(),
        working_tree: config.working_tree.clone(),
        manifest_dir: PathBuf::from(profile.manifest_dir),
        fixtures: profile.fixtures.iter().map(PathBuf::from).collect(),
        namespace: config.plugin_namespace.clone(),
        ..Default::default()
    }
}

fn print_report(report: &ScenarioReport, format: ReportFormat) -> anyhow::Result<()> {
    match format {
        ReportFormat::Text => print!("{}", report),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("tower=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
