//! A [`DriverPort`] over plain HTTP.
//!
//! Pages are fetched with reqwest and clicks are resolved against the
//! fetched markup: links and `data-href` targets are followed, submit
//! buttons of GET forms submit the form with whatever was filled in. No
//! script runs, so anything that needs a browser is out of reach.

use crate::error::{Result, ScanError};
use crate::port::{DriverError, DriverPort, Surface};
use crate::step::{InteractionStep, StepKind};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

struct Page {
    url: Url,
    html: String,
}

pub struct HttpDriver {
    client: Client,
    root: Url,
    timeout: Duration,
    current: Option<Page>,
    values: HashMap<String, String>,
}

impl HttpDriver {
    pub fn new(root: &str) -> Result<Self> {
        Self::with_timeout(root, Duration::from_secs(15))
    }

    pub fn with_timeout(root: &str, timeout: Duration) -> Result<Self> {
        let root =
            Url::parse(root).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", root, e)))?;
        if !matches!(root.scheme(), "http" | "https") {
            return Err(ScanError::InvalidUrl(format!(
                "unsupported scheme: {}",
                root.scheme()
            )));
        }

        let client = Client::builder()
            .user_agent("Waymark/0.1 (https://github.com/trapdoorsec/waymark)")
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            root,
            timeout,
            current: None,
            values: HashMap::new(),
        })
    }

    pub fn root(&self) -> &str {
        self.root.as_str()
    }

    async fn load(&mut self, url: Url) -> std::result::Result<Surface, DriverError> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::ActionFailed(format!(
                "{} returned {}",
                url, status
            )));
        }

        let final_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| self.request_error(&url, e))?;

        let surface = Surface::new(final_url.as_str(), html.clone());
        self.current = Some(Page {
            url: final_url,
            html,
        });
        self.values.clear();
        Ok(surface)
    }

    fn request_error(&self, url: &Url, error: reqwest::Error) -> DriverError {
        if error.is_timeout() {
            DriverError::Timeout {
                operation: format!("GET {}", url),
                millis: self.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            DriverError::SessionLost(format!("cannot reach {}: {}", url, error))
        } else {
            DriverError::ActionFailed(error.to_string())
        }
    }

    fn page(&self) -> std::result::Result<&Page, DriverError> {
        self.current
            .as_ref()
            .ok_or_else(|| DriverError::ActionFailed("no page loaded".to_string()))
    }

    /// Where clicking `locator` leads, or `None` when it stays on the page.
    fn click_target(&self, locator: &str) -> std::result::Result<Option<Url>, DriverError> {
        let page = self.page()?;
        let document = Html::parse_document(&page.html);
        let element = find(&document, locator)?;
        let attrs = element.value();

        if let Some(href) = attrs.attr("href").or_else(|| attrs.attr("data-href")) {
            return Ok(resolve(&page.url, href));
        }
        if let Some(action) = attrs.attr("formaction") {
            return Ok(resolve(&page.url, action));
        }
        if !is_submit(&element) {
            return Ok(None);
        }

        let Some(form) = element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "form")
        else {
            return Ok(None);
        };

        let method = form.value().attr("method").unwrap_or("get");
        if !method.eq_ignore_ascii_case("get") {
            return Err(DriverError::ActionFailed(format!(
                "refusing to submit {} form",
                method.to_uppercase()
            )));
        }

        let action = form.value().attr("action").unwrap_or("");
        let mut target = resolve(&page.url, action).unwrap_or_else(|| page.url.clone());
        target.set_query(None);

        let fields = selector("input[name], select[name], textarea[name]")?;
        {
            let mut query = target.query_pairs_mut();
            for field in form.select(&fields) {
                let kind = field.value().attr("type").unwrap_or("text");
                if matches!(kind, "submit" | "button" | "reset" | "image") {
                    continue;
                }
                let Some(name) = field.value().attr("name") else {
                    continue;
                };
                let value = self
                    .values
                    .get(name)
                    .map(String::as_str)
                    .or_else(|| field.value().attr("value"))
                    .unwrap_or("");
                query.append_pair(name, value);
            }
        }
        Ok(Some(target))
    }

    fn fill(&mut self, step: &InteractionStep) -> std::result::Result<(), DriverError> {
        let key = {
            let page = self.page()?;
            let document = Html::parse_document(&page.html);
            let element = find(&document, &step.locator)?;
            let attrs = element.value();
            attrs
                .attr("name")
                .or_else(|| attrs.attr("id"))
                .unwrap_or(&step.locator)
                .to_string()
        };
        self.values
            .insert(key, step.value.clone().unwrap_or_default());
        Ok(())
    }
}

#[async_trait]
impl DriverPort for HttpDriver {
    async fn reset_to_root(&mut self) -> std::result::Result<Surface, DriverError> {
        self.load(self.root.clone()).await
    }

    async fn execute(
        &mut self,
        step: &InteractionStep,
    ) -> std::result::Result<Surface, DriverError> {
        match step.kind {
            StepKind::NavigateRoot => return self.load(self.root.clone()).await,
            StepKind::Wait => {
                let millis = step
                    .value
                    .as_deref()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
            }
            StepKind::Click => {
                if let Some(target) = self.click_target(&step.locator)? {
                    return self.load(target).await;
                }
            }
            StepKind::Fill | StepKind::Select => self.fill(step)?,
        }
        self.capture_surface().await
    }

    async fn capture_surface(&mut self) -> std::result::Result<Surface, DriverError> {
        let page = self.page()?;
        Ok(Surface::new(page.url.as_str(), page.html.clone()))
    }
}

fn selector(css: &str) -> std::result::Result<Selector, DriverError> {
    Selector::parse(css)
        .map_err(|e| DriverError::ActionFailed(format!("bad locator {}: {}", css, e)))
}

fn find<'a>(
    document: &'a Html,
    locator: &str,
) -> std::result::Result<ElementRef<'a>, DriverError> {
    let parsed = selector(locator)?;
    document
        .select(&parsed)
        .next()
        .ok_or_else(|| DriverError::StepNotFound {
            locator: locator.to_string(),
        })
}

fn is_submit(element: &ElementRef) -> bool {
    let attrs = element.value();
    match attrs.name() {
        "button" => attrs
            .attr("type")
            .is_none_or(|t| t.eq_ignore_ascii_case("submit")),
        "input" => attrs
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("submit")),
        _ => false,
    }
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    url.set_fragment(None);
    Some(url)
}
