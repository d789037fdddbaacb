//! Server-side HTML for the upload, result and content pages.

use minijinja::{Environment, context};
use serde::Serialize;

use crate::content::DisplayContent;
use crate::error::Result;
use crate::ranking::{ProbabilityBar, RankedLabel};

/// Result page input.
#[derive(Debug, Serialize)]
pub struct ResultView<'a> {
    pub labels: &'a [String],
    pub image_uri: String,
    pub predicted: &'a str,
    /// Probabilities in vocabulary order, comma separated, so the label
    /// selector can redraw this page without server-side state.
    pub probs: String,
    pub bars: Vec<ProbabilityBar>,
    pub content: DisplayContent,
}

impl<'a> ResultView<'a> {
    pub fn new(
        labels: &'a [String],
        image_uri: String,
        predicted: &'a str,
        probabilities: &[f32],
        ranked: &[RankedLabel],
        content: DisplayContent,
    ) -> Self {
        Self {
            labels,
            image_uri,
            predicted,
            probs: probabilities
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(","),
            bars: ranked
                .iter()
                .map(|r| ProbabilityBar::from_ranked(r, predicted))
                .collect(),
            content,
        }
    }
}

pub struct Renderer {
    env: Environment<'static>,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("base.html", include_str!("../templates/base.html"))?;
        env.add_template("upload_form.html", include_str!("../templates/upload_form.html"))?;
        env.add_template("content_panel.html", include_str!("../templates/content_panel.html"))?;
        env.add_template("index.html", include_str!("../templates/index.html"))?;
        env.add_template("result.html", include_str!("../templates/result.html"))?;
        env.add_template("content.html", include_str!("../templates/content.html"))?;
        Ok(Self { env })
    }

    pub fn index(&self, labels: &[String], error: Option<&str>) -> Result<String> {
        Ok(self
            .env
            .get_template("index.html")?
            .render(context! { labels, error })?)
    }

    pub fn result(&self, view: &ResultView<'_>) -> Result<String> {
        Ok(self.env.get_template("result.html")?.render(view)?)
    }

    pub fn content(
        &self,
        labels: &[String],
        content: &DisplayContent,
        predicted: Option<&str>,
    ) -> Result<String> {
        Ok(self
            .env
            .get_template("content.html")?
            .render(context! { labels, content, predicted })?)
    }
}
