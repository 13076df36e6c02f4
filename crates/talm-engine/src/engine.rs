//! Template engine based on MiniJinja

use minijinja::Environment;
use std::collections::BTreeMap;
use std::sync::Arc;
use talm_core::{LoadedChart, MachineRole, TemplateContext};

use crate::cancel::Cancellation;
use crate::discovery::Discovery;
use crate::error::{EngineError, Result};
use crate::filters;
use crate::functions;
use crate::lookup::{LookupProvider, StaticLookup};

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
    lookup: Option<Arc<dyn LookupProvider>>,
    cancellation: Cancellation,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            strict_mode: true,
            lookup: None,
            cancellation: Cancellation::new(),
        }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Source of node facts for discovery functions
    ///
    /// Defaults to an empty [`StaticLookup`], i.e. fully offline rendering.
    pub fn lookup(mut self, provider: Arc<dyn LookupProvider>) -> Self {
        self.lookup = Some(provider);
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Build the engine
    pub fn build(self) -> Engine {
        let provider = self
            .lookup
            .unwrap_or_else(|| Arc::new(StaticLookup::empty()));
        Engine {
            strict_mode: self.strict_mode,
            discovery: Discovery::new(provider, self.cancellation.clone()),
            cancellation: self.cancellation,
        }
    }
}

/// The template engine
pub struct Engine {
    strict_mode: bool,
    discovery: Discovery,
    cancellation: Cancellation,
}

impl Engine {
    /// Create an offline engine with default settings
    pub fn new(strict_mode: bool) -> Self {
        EngineBuilder::new().strict(strict_mode).build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Machine role reported by the lookup provider, if it knows one
    pub fn discovered_role(&self) -> Result<Option<MachineRole>> {
        let reported = self
            .discovery
            .machine_type()
            .map_err(|e| EngineError::from_render(e, "<discovery>", "", None))?;
        if reported.is_empty() {
            return Ok(None);
        }
        Ok(Some(reported.parse::<MachineRole>()?))
    }

    /// Create a configured MiniJinja environment
    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("empty", filters::empty);
        env.add_filter("haskey", filters::haskey);
        env.add_filter("keys", filters::keys);
        env.add_filter("merge", filters::merge);
        env.add_filter("sha256", filters::sha256sum);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);
        env.add_filter("semver_match", filters::semver_match);
        env.add_filter("ip_address", filters::ip_address);
        env.add_filter("ip_prefix", filters::ip_prefix);
        env.add_filter("is_ipv6", filters::is_ipv6);

        env.add_function("fail", functions::fail);
        env.add_function("dict", functions::dict);
        env.add_function("list", functions::list);
        env.add_function("get", functions::get);
        env.add_function("dig", functions::dig);
        env.add_function("coalesce", functions::coalesce);
        env.add_function("ternary", functions::ternary);
        env.add_function("tostring", functions::tostring);
        env.add_function("toint", functions::toint);
        env.add_function("printf", functions::printf);

        self.discovery.register(&mut env);

        env
    }

    fn context_value(context: &TemplateContext) -> minijinja::Value {
        minijinja::context! {
            machineType => context.machine_type.as_str(),
            values => &context.values,
            chart => &context.chart,
            capabilities => &context.capabilities,
        }
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &TemplateContext,
        template_name: &str,
    ) -> Result<String> {
        self.cancellation.check()?;

        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| EngineError::from_render(e, template_name, template, None))?;

        let tmpl = env
            .get_template(template_name)
            .map_err(|e| EngineError::from_render(e, template_name, template, None))?;

        let rendered = tmpl
            .render(Self::context_value(context))
            .map_err(|e| {
                EngineError::from_render(e, template_name, template, Some(&context.values))
            })?;

        self.cancellation.check()?;
        Ok(rendered)
    }

    /// Render the named chart templates into one YAML stream
    ///
    /// Every file under `templates/` is loaded so templates can `import` or
    /// `include` each other (helpers conventionally start with `_`). Names
    /// are relative to the chart root, e.g. `templates/controlplane.yaml`.
    /// Each requested template becomes one document; empty output is skipped.
    pub fn render_chart(
        &self,
        chart: &LoadedChart,
        context: &TemplateContext,
        template_names: &[String],
    ) -> Result<String> {
        self.cancellation.check()?;

        let mut sources = BTreeMap::new();
        for path in chart.template_files()? {
            let content = std::fs::read_to_string(&path).map_err(|source| EngineError::Io {
                path: path.clone(),
                source,
            })?;
            sources.insert(chart.template_name(&path), content);
        }

        let mut env = self.create_environment();
        for (name, source) in &sources {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|e| EngineError::from_render(e, name, source, None))?;
        }

        let ctx = Self::context_value(context);
        let mut documents = Vec::with_capacity(template_names.len());

        for requested in template_names {
            self.cancellation.check()?;

            let name = normalize_template_name(requested);
            let source = sources
                .get(&name)
                .ok_or_else(|| EngineError::TemplateNotFound { name: name.clone() })?;

            tracing::debug!(template = %name, role = %context.machine_type, "rendering template");

            let tmpl = env
                .get_template(&name)
                .map_err(|e| EngineError::from_render(e, &name, source, None))?;
            let rendered = tmpl
                .render(&ctx)
                .map_err(|e| EngineError::from_render(e, &name, source, Some(&context.values)))?;

            let document = rendered.trim_end();
            let document = document
                .strip_prefix("---")
                .filter(|rest| rest.starts_with('\n'))
                .unwrap_or(document)
                .trim_start_matches('\n');
            if document.trim().is_empty() {
                tracing::debug!(template = %name, "template rendered empty, skipping");
                continue;
            }
            documents.push(document.to_string());
        }

        self.cancellation.check()?;

        if documents.is_empty() {
            return Ok(String::new());
        }
        let mut out = documents.join("\n---\n");
        out.push('\n');
        Ok(out)
    }
}

/// `./templates\\worker.yaml` -> `templates/worker.yaml`
fn normalize_template_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    let mut name = name.as_str();
    while let Some(rest) = name.strip_prefix("./") {
        name = rest;
    }
    name.to_string()
}
