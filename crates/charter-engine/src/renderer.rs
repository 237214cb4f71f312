//! Chart template rendering
//!
//! A [`Renderer`] turns a chart's templates plus its current property
//! values into raw multi-document text. The deployment engine only ever
//! decodes that text, so any renderer producing YAML or JSON documents fits.

use charter_core::LoadedChart;
use minijinja::Environment;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{EngineError, Result};
use crate::filters;

/// Chart identity visible to templates as `chart`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub genus: String,
}

/// Everything a template can see
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderContext {
    pub chart: ChartInfo,

    /// Property values, including vault attributes under the vault name
    pub values: JsonValue,
}

/// Produces the multi-document text of a chart
pub trait Renderer: Send + Sync {
    fn render(&self, chart: &LoadedChart, context: &RenderContext) -> Result<String>;
}

/// MiniJinja renderer over `templates/`
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    strict_mode: bool,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TemplateRenderer {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("required", filters::required);

        env
    }

    /// Render a single template string
    pub fn render_string(
        &self,
        template: &str,
        context: &RenderContext,
        template_name: &str,
    ) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(template_name.to_string(), template.to_string())
            .map_err(|e| EngineError::from_minijinja(e, template_name))?;

        let tmpl = env
            .get_template(template_name)
            .map_err(|e| EngineError::from_minijinja(e, template_name))?;

        let ctx = minijinja::context! {
            chart => &context.chart,
            values => &context.values,
        };

        tmpl.render(ctx)
            .map_err(|e| EngineError::from_minijinja(e, template_name))
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, chart: &LoadedChart, context: &RenderContext) -> Result<String> {
        let mut documents = Vec::new();

        for path in chart.template_files()? {
            let name = path
                .strip_prefix(&chart.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let source = std::fs::read_to_string(&path)?;
            let rendered = self.render_string(&source, context, &name)?;
            if !rendered.trim().is_empty() {
                documents.push(rendered);
            }
        }

        Ok(documents.join("\n---\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charter_core::ObjectStream;
    use charter_core::chart::{MANIFEST_FILE, TEMPLATES_DIR};
    use serde_json::json;
    use tempfile::TempDir;

    fn context() -> RenderContext {
        RenderContext {
            chart: ChartInfo {
                name: "shop".into(),
                version: "1.0.0".into(),
                namespace: "apps".into(),
                genus: String::new(),
            },
            values: json!({
                "replicas": 3,
                "image": {"repository": "nginx", "tag": "1.25"},
                "admin": {"username": "admin", "password": "s3cret"}
            }),
        }
    }

    #[test]
    fn test_render_simple() {
        let renderer = TemplateRenderer::default();
        let result = renderer
            .render_string("replicas: {{ values.replicas }}", &context(), "t.yaml")
            .unwrap();
        insta::assert_snapshot!(result, @"replicas: 3");
    }

    #[test]
    fn test_render_chart_info_and_filters() {
        let renderer = TemplateRenderer::default();
        let template = "name: {{ chart.name }}-{{ chart.version }}\npassword: {{ values.admin.password | b64encode }}";
        let result = renderer.render_string(template, &context(), "t.yaml").unwrap();
        assert!(result.contains("name: shop-1.0.0"));
        assert!(result.contains("password: czNjcmV0"));
    }

    #[test]
    fn test_strict_mode_rejects_undefined() {
        let renderer = TemplateRenderer::default();
        let err = renderer
            .render_string("x: {{ values.missing.deep }}", &context(), "bad.yaml")
            .unwrap_err();
        match err {
            EngineError::Template { template, .. } => assert_eq!(template, "bad.yaml"),
            other => panic!("unexpected: {other:?}"),
        }

        let lenient = TemplateRenderer::new(false);
        assert!(lenient
            .render_string("x: {{ values.missing }}", &context(), "ok.yaml")
            .is_ok());
    }

    #[test]
    fn test_render_chart_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(MANIFEST_FILE),
            "apiVersion: charter/v1\nname: shop\nversion: 1.0.0\n",
        )
        .unwrap();
        let templates = temp.path().join(TEMPLATES_DIR);
        std::fs::create_dir_all(&templates).unwrap();
        std::fs::write(
            templates.join("app.yaml"),
            "apiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: {{ chart.name }}\nspec:\n  replicas: {{ values.replicas }}\n",
        )
        .unwrap();
        std::fs::write(
            templates.join("secret.yaml"),
            "apiVersion: v1\nkind: Secret\nmetadata:\n  name: {{ chart.name }}-admin\nstringData:\n  user: {{ values.admin.username }}\n---\n",
        )
        .unwrap();
        std::fs::write(templates.join("empty.yaml"), "{# nothing #}\n").unwrap();

        let chart = LoadedChart::load(temp.path()).unwrap();
        let text = TemplateRenderer::default().render(&chart, &context()).unwrap();

        let objects = ObjectStream::decode(&text).collect_objects().unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind, "StatefulSet");
        assert_eq!(objects[0].additional["spec"]["replicas"], 3);
        assert_eq!(objects[1].name(), "shop-admin");
    }
}
