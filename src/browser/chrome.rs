//! Headless Chrome sessions over the DevTools protocol.
//!
//! One [`ChromeBrowser`] is launched per run. Each batch opens tabs on it
//! through [`SessionFactory`] and closes them again at the end of the batch;
//! the browser process itself lives until the factory is shut down.

use super::{BrowserSession, SessionError, SessionFactory};
use crate::config::ScrapeConfig;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::EventLifecycleEvent;
use futures::StreamExt;
use rand::rng;
use rand::seq::IndexedRandom;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Options fixed at browser launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSettings {
    pub headless: bool,
    /// Chosen once per launch, shared by every tab.
    pub user_agent: String,
    pub proxy: Option<Url>,
}

impl LaunchSettings {
    /// Derive launch settings, picking one of the configured user agents at random.
    pub fn from_config(config: &ScrapeConfig) -> Self {
        let candidates: Vec<&String> = config
            .user_agents
            .iter()
            .filter(|ua| !ua.trim().is_empty())
            .collect();
        let user_agent = candidates
            .choose(&mut rng())
            .map(|ua| ua.to_string())
            .unwrap_or_default();

        Self {
            headless: config.headless,
            user_agent,
            proxy: config.proxy.clone(),
        }
    }

    /// Extra Chrome command-line flags.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-setuid-sandbox".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-dev-shm-usage".to_string(),
        ];
        if !self.user_agent.is_empty() {
            args.push(format!("--user-agent={}", self.user_agent));
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy_server(proxy)));
        }
        args
    }
}

/// `scheme://host:port`, the form Chrome's `--proxy-server` flag expects.
fn proxy_server(proxy: &Url) -> String {
    match (proxy.host_str(), proxy.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", proxy.scheme(), host, port),
        _ => proxy.as_str().trim_end_matches('/').to_string(),
    }
}

/// A running Chrome process plus the task draining its DevTools events.
pub struct ChromeBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromeBrowser {
    /// Launch Chrome. Failure here means no session pool can be built at all.
    #[instrument(level = "info", skip_all, fields(headless = settings.headless, proxy = settings.proxy.is_some()))]
    pub async fn launch(settings: &LaunchSettings) -> Result<Self, SessionError> {
        let mut builder = BrowserConfig::builder().no_sandbox();
        if !settings.headless {
            builder = builder.with_head();
        }
        for arg in settings.launch_args() {
            builder = builder.arg(arg);
        }
        let config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "DevTools handler error");
                }
            }
        });

        info!(user_agent = %settings.user_agent, "Launched Chrome");
        Ok(Self { browser, handler })
    }
}

impl SessionFactory for ChromeBrowser {
    type Session = ChromeTab;

    async fn open(&self) -> Result<ChromeTab, SessionError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::Open(e.to_string()))?;
        Ok(ChromeTab { page })
    }

    async fn release(&self, session: ChromeTab) {
        if let Err(e) = session.page.close().await {
            warn!(error = %e, "Failed to close tab");
        }
    }

    /// Close the browser and stop the event task.
    #[instrument(level = "info", skip_all)]
    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed waiting for browser exit");
        }
        self.handler.abort();
        info!("Browser closed");
    }
}

/// One Chrome tab used as a [`BrowserSession`].
pub struct ChromeTab {
    page: Page,
}

/// Lifecycle events Chrome emits once at most two connections remain open, or none.
const IDLE_EVENTS: [&str; 2] = ["networkAlmostIdle", "networkIdle"];

/// Decides page readiness from `Page.lifecycleEvent` notifications.
///
/// Only main-frame events count. Once the navigation's `init` event has been
/// seen, idle events from any other loader (the page being left) are ignored.
#[derive(Debug)]
struct NetworkIdle {
    main_frame: Option<String>,
    loader: Option<String>,
}

impl NetworkIdle {
    fn new(main_frame: Option<String>) -> Self {
        Self {
            main_frame,
            loader: None,
        }
    }

    /// Feed one lifecycle event; `true` once the page counts as ready.
    fn observe(&mut self, frame_id: &str, loader_id: &str, name: &str) -> bool {
        if self.main_frame.as_deref().is_some_and(|main| main != frame_id) {
            return false;
        }
        if name == "init" {
            self.loader = Some(loader_id.to_string());
            return false;
        }
        IDLE_EVENTS.contains(&name)
            && self.loader.as_deref().is_none_or(|current| current == loader_id)
    }
}

impl BrowserSession for ChromeTab {
    /// Ready means the main frame reported network (almost) idle. The
    /// listener is attached before `goto` so no lifecycle event is missed.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SessionError> {
        let navigation = async {
            let mut lifecycle = self
                .page
                .event_listener::<EventLifecycleEvent>()
                .await
                .map_err(|e| SessionError::Navigation(e.to_string()))?;
            let main_frame = self
                .page
                .mainframe()
                .await
                .map_err(|e| SessionError::Navigation(e.to_string()))?;

            self.page
                .goto(url)
                .await
                .map_err(|e| SessionError::Navigation(e.to_string()))?;

            let mut idle = NetworkIdle::new(main_frame.map(|f| f.inner().clone()));
            while let Some(event) = lifecycle.next().await {
                if idle.observe(event.frame_id.inner(), event.loader_id.inner(), &event.name) {
                    return Ok(());
                }
            }
            Err(SessionError::Navigation(
                "lifecycle event stream closed before network idle".into(),
            ))
        };

        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| SessionError::Timeout(timeout))?
    }

    async fn evaluate(&self, script: &str) -> Result<(), SessionError> {
        self.page
            .evaluate(script)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Script(e.to_string()))
    }

    async fn content(&self) -> Result<String, SessionError> {
        self.page
            .content()
            .await
            .map_err(|e| SessionError::Content(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_picked_from_config() {
        let config = ScrapeConfig {
            user_agents: vec!["ua-one".to_string(), "ua-two".to_string()],
            ..ScrapeConfig::default()
        };
        for _ in 0..20 {
            let settings = LaunchSettings::from_config(&config);
            assert!(settings.user_agent == "ua-one" || settings.user_agent == "ua-two");
        }
    }

    #[test]
    fn test_launch_args_include_agent_and_proxy() {
        let settings = LaunchSettings {
            headless: true,
            user_agent: "TestAgent/1.0".to_string(),
            proxy: Some(Url::parse("http://proxy.local:8080").unwrap()),
        };
        let args = settings.launch_args();
        assert!(args.contains(&"--user-agent=TestAgent/1.0".to_string()));
        assert!(args.contains(&"--proxy-server=http://proxy.local:8080".to_string()));
    }

    #[test]
    fn test_launch_args_without_proxy() {
        let settings = LaunchSettings {
            headless: true,
            user_agent: "TestAgent/1.0".to_string(),
            proxy: None,
        };
        assert!(
            !settings
                .launch_args()
                .iter()
                .any(|a| a.starts_with("--proxy-server"))
        );
    }

    #[test]
    fn test_network_idle_waits_for_main_frame_idle() {
        let mut idle = NetworkIdle::new(Some("main".to_string()));
        assert!(!idle.observe("main", "L1", "init"));
        assert!(!idle.observe("main", "L1", "load"));
        assert!(!idle.observe("main", "L1", "DOMContentLoaded"));
        assert!(idle.observe("main", "L1", "networkAlmostIdle"));
    }

    #[test]
    fn test_network_idle_ignores_subframes_and_previous_loader() {
        let mut idle = NetworkIdle::new(Some("main".to_string()));
        assert!(!idle.observe("ad-frame", "A1", "networkIdle"));
        assert!(!idle.observe("main", "L2", "init"));
        // late idle from the page being navigated away from
        assert!(!idle.observe("main", "L1", "networkIdle"));
        assert!(!idle.observe("ad-frame", "A2", "networkAlmostIdle"));
        assert!(idle.observe("main", "L2", "networkIdle"));
    }

    #[test]
    fn test_network_idle_without_init() {
        let mut idle = NetworkIdle::new(None);
        assert!(!idle.observe("any", "L1", "load"));
        assert!(idle.observe("any", "L1", "networkIdle"));
    }

    #[test]
    fn test_proxy_server_uses_default_port() {
        let proxy = Url::parse("socks5://user:pw@10.0.0.1:1080/").unwrap();
        assert_eq!(proxy_server(&proxy), "socks5://10.0.0.1:1080");
        let https = Url::parse("https://proxy.example.com").unwrap();
        assert_eq!(proxy_server(&https), "https://proxy.example.com:443");
    }
}
