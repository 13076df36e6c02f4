//! Template command - render node configs from the chart

use clap::Args;
use console::style;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use talm_config::yamltools::merge_comments;
use talm_config::{
    AssembleOptions, DEFAULT_KUBERNETES_VERSION, DEFAULT_TALOS_VERSION, assemble, classify_files,
};
use talm_core::modeline::split_header;
use talm_core::{
    Capabilities, FileBundleProvider, LoadedChart, MachineRole, Modeline, ModelineError,
    SecretsBundle, SecretsBundleProvider, TemplateContext, Values, VersionContract,
};
use talm_engine::{Cancellation, Engine, LookupProvider, StaticLookup};
use talm_secrets::SecretsStore;

use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Node file(s) to re-render; nodes, endpoints and templates come from their modeline
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Rewrite the node files in place, keeping their comments
    #[arg(short = 'i', long)]
    pub in_place: bool,

    /// Templates to render, relative to the chart root
    #[arg(short = 't', long = "template", value_delimiter = ',')]
    pub templates: Vec<String>,

    /// Target node addresses
    #[arg(short = 'n', long, value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Control plane endpoints
    #[arg(short = 'e', long, value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Values file(s) to merge over values.yaml
    #[arg(long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Render without node facts; every lookup comes back empty
    #[arg(long)]
    pub offline: bool,

    /// Node facts snapshot (YAML, resource kind -> resources)
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Emit the fully assembled machine config instead of the rendered patch
    #[arg(long)]
    pub full: bool,

    /// Patch file(s) applied on top of the rendered config (with --full)
    #[arg(long = "patch")]
    pub patches: Vec<PathBuf>,

    /// Secrets bundle to build the full config from
    #[arg(long)]
    pub with_secrets: Option<PathBuf>,

    /// Talos version contract, e.g. v1.9
    #[arg(long, env = "TALM_TALOS_VERSION")]
    pub talos_version: Option<String>,

    #[arg(long, env = "TALM_KUBERNETES_VERSION")]
    pub kubernetes_version: Option<String>,

    /// Machine role (controlplane or worker) when the node does not report one
    #[arg(long)]
    pub machine_type: Option<String>,

    /// Abort rendering after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

/// One output: a node file, or stdout when rendering from flags only
struct Target {
    file: Option<PathBuf>,
    previous: Option<String>,
    modeline: Modeline,
}

/// Chart-level settings shared by every target
struct Settings {
    talos_version: String,
    kubernetes_version: String,
    full: bool,
}

pub fn run(root: &Path, args: &TemplateArgs) -> Result<()> {
    let chart = LoadedChart::load(root)?;
    let options = &chart.metadata.template_options;

    if args.in_place && args.files.is_empty() {
        return Err(CliError::input("--in-place requires at least one --file"));
    }

    let settings = Settings {
        talos_version: args
            .talos_version
            .clone()
            .or_else(|| options.talos_version.clone())
            .unwrap_or_else(|| DEFAULT_TALOS_VERSION.to_string()),
        kubernetes_version: args
            .kubernetes_version
            .clone()
            .or_else(|| options.kubernetes_version.clone())
            .unwrap_or_else(|| DEFAULT_KUBERNETES_VERSION.to_string()),
        full: args.full || options.full,
    };
    if !args.patches.is_empty() && !settings.full {
        return Err(CliError::input_with_help(
            "--patch only applies to the assembled config",
            "add --full",
        ));
    }

    let value_files: Vec<PathBuf> = options
        .value_files
        .iter()
        .map(|p| chart.resolve(p))
        .chain(args.values.iter().cloned())
        .collect();
    let values = Values::layered(Some(chart.values_path.as_path()), &value_files, &args.set)?;

    let provider = lookup_provider(args, args.offline || options.offline)?;
    let mut cancellation = Cancellation::new();
    if let Some(secs) = args.timeout {
        cancellation = cancellation.with_timeout(Duration::from_secs(secs));
    }
    let engine = Engine::builder()
        .lookup(provider)
        .cancellation(cancellation)
        .build();

    for target in targets(args)? {
        let templates = &target.modeline.templates;
        if templates.is_empty() {
            return Err(CliError::input_with_help(
                "no templates to render",
                "pass --template, or --file with a node file carrying a modeline",
            ));
        }

        let role = machine_role(args, &engine, templates)?;
        tracing::debug!(role = %role, templates = ?templates, "rendering");

        let context = TemplateContext::for_chart(role, values.clone(), &chart.metadata)
            .with_capabilities(Capabilities {
                talos_version: settings.talos_version.clone(),
                kubernetes_version: settings.kubernetes_version.clone(),
            });
        let rendered = engine.render_chart(&chart, &context, templates)?;

        let document = if settings.full {
            full_config(&chart, args, &settings, &rendered)?
        } else {
            rendered
        };
        let output = target.modeline.wrap(&document);

        match (&target.file, args.in_place) {
            (Some(path), true) => {
                let merged = match &target.previous {
                    Some(previous) => merge_comments(previous, &output),
                    None => output,
                };
                talm_core::fsutil::write_atomic(path, merged.as_bytes())?;
                println!("{} {}", style("wrote").green(), path.display());
            }
            _ => print!("{}", output),
        }
    }

    Ok(())
}

fn lookup_provider(args: &TemplateArgs, offline: bool) -> Result<Arc<dyn LookupProvider>> {
    match (&args.snapshot, offline) {
        (Some(path), false) => {
            let snapshot = StaticLookup::from_file(path)
                .map_err(|e| CliError::input(format!("invalid snapshot: {}", e)))?;
            tracing::debug!(path = %path.display(), resources = snapshot.len(), "loaded node snapshot");
            Ok(Arc::new(snapshot))
        }
        (Some(path), true) => {
            tracing::warn!(path = %path.display(), "offline mode, ignoring snapshot");
            Ok(Arc::new(StaticLookup::empty()))
        }
        (None, _) => Ok(Arc::new(StaticLookup::empty())),
    }
}

/// Render targets: one per node file, or a single stdout target
///
/// Explicit flags take precedence over modeline fields.
fn targets(args: &TemplateArgs) -> Result<Vec<Target>> {
    let from_flags = Modeline::new(
        args.nodes.clone(),
        args.endpoints.clone(),
        args.templates.clone(),
    );

    if args.files.is_empty() {
        return Ok(vec![Target {
            file: None,
            previous: None,
            modeline: from_flags,
        }]);
    }

    let mut targets = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let (previous, stored) = match std::fs::read_to_string(path) {
            Ok(content) => {
                let stored = match split_header(&content).0 {
                    Ok(modeline) => modeline,
                    Err(ModelineError::NotFound) => Modeline::default(),
                    Err(e) => {
                        return Err(CliError::input(format!("{}: {}", path.display(), e)));
                    }
                };
                (Some(content), stored)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && args.in_place => {
                (None, Modeline::default())
            }
            Err(e) => return Err(CliError::io(format!("{}: {}", path.display(), e))),
        };

        let pick = |flag: &Vec<String>, stored: Vec<String>| {
            if flag.is_empty() { stored } else { flag.clone() }
        };
        targets.push(Target {
            file: Some(path.clone()),
            previous,
            modeline: Modeline::new(
                pick(&from_flags.nodes, stored.nodes),
                pick(&from_flags.endpoints, stored.endpoints),
                pick(&from_flags.templates, stored.templates),
            ),
        });
    }
    Ok(targets)
}

/// `--machine-type`, then the node's own report, then the template names
fn machine_role(args: &TemplateArgs, engine: &Engine, templates: &[String]) -> Result<MachineRole> {
    if let Some(flag) = &args.machine_type {
        return Ok(MachineRole::from_str(flag)?);
    }
    if let Some(role) = engine.discovered_role()? {
        return Ok(role);
    }

    let control_plane = templates.iter().any(|name| {
        Path::new(name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem == "controlplane" || stem == "init")
    });
    Ok(if control_plane {
        MachineRole::ControlPlane
    } else {
        MachineRole::Worker
    })
}

/// `--with-secrets` / `withSecrets`, else the project's own (possibly encrypted) secrets.yaml
fn load_bundle(chart: &LoadedChart, args: &TemplateArgs, settings: &Settings) -> Result<SecretsBundle> {
    let explicit = args
        .with_secrets
        .clone()
        .or_else(|| chart.metadata.template_options.with_secrets.clone());

    match explicit {
        Some(path) => {
            let contract = VersionContract::parse(&settings.talos_version)?;
            let provider = FileBundleProvider::new(chart.resolve(&path));
            Ok(provider.load_or_generate(Some(contract))?)
        }
        None => Ok(SecretsStore::new(&chart.root).load_bundle()?),
    }
}

fn full_config(
    chart: &LoadedChart,
    args: &TemplateArgs,
    settings: &Settings,
    rendered: &str,
) -> Result<String> {
    let bundle = load_bundle(chart, args, settings)?;
    let classification = classify_files(&args.patches)?;

    let options = AssembleOptions::new()
        .talos_version(settings.talos_version.clone())
        .kubernetes_version(settings.kubernetes_version.clone());
    let mut config = assemble(rendered, &classification.patches, &bundle, &options)?;
    config.extras.extend(classification.extras);

    Ok(config.to_multi_document_yaml()?)
}
