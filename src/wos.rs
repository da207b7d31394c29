//! Web of Science portal session driving a real browser.
//!
//! This module provides the core automation: a stateful [`Session`] that
//! searches the portal's advanced search for a DOI, triggers the
//! server-side full-record export through the portal UI, and captures the
//! resulting download from the browser's network traffic. The portal is an
//! Angular application behind entitlement checks, so everything goes
//! through a driven Chrome instance rather than an HTTP client.

use crate::cookies::{Cookie, CookieManager};
use crate::error::{Result, WosError};
use crate::table::{RecordTable, CITING_DOI_COLUMN};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use headless_chrome::{Browser, LaunchOptions, Tab};
use regex::Regex;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Default portal entry point: the advanced-search page
pub const ADVANCED_SEARCH_URL: &str = "https://www.webofscience.com/wos/woscc/advanced-search";

/// Reject-all button of the cookie-consent banner
const COOKIE_REJECT_SELECTOR: &str = "#onetrust-reject-all-handler";

/// DOM id of the advanced-search query box
const SEARCH_INPUT_ID: &str = "advancedSearchInputArea";
const SEARCH_INPUT_SELECTOR: &str = "#advancedSearchInputArea";

/// Substring of the URL that serves the export download
const EXPORT_RESPONSE_URL: &str = "export/saveToFile";

/// Shape of a well-formed DOI: `10.<registrant>/<suffix>`
const DOI_SHAPE: &str = r"^10\.\d{4,9}/\S+$";

/// The export UI chain, clicked in order: open the Export menu, pick the
/// tab-delimited format, select the record range, open the record-content
/// dropdown, pick Full Record, confirm.
const EXPORT_CLICK_CHAIN: &[&str] = &[
    "//span[@class='mat-button-wrapper' and contains(text(),'Export')]",
    "//button[@id='exportToTabWinButton']",
    "//input[@class='mat-radio-input' and @value='fromRange']/../..",
    "//button[@aria-label=' Author, Title, Source']",
    "//div[@title='Full Record']",
    "//span[contains(text(),'Export')]",
];

/// Options for a portal session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Run the browser without a visible window
    pub headless: bool,
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Explicit Chrome/Chromium binary path
    pub browser_path: Option<PathBuf>,
    /// Start-page override for institutional mirrors
    pub start_url: Option<String>,
    /// Wait timeout for individual page elements
    pub element_timeout: Duration,
    /// Wait timeout for the search-submit page transition
    pub search_timeout: Duration,
    /// Wait timeout for the export download
    pub export_timeout: Duration,
    /// Cookie file override
    pub cookie_file: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            browser_path: None,
            start_url: None,
            element_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(15),
            export_timeout: Duration::from_secs(30),
            cookie_file: None,
        }
    }
}

type CaptureOutcome = std::result::Result<Vec<u8>, String>;

/// One-shot handoff slot between the network response handler and the
/// thread waiting for an export download.
///
/// Arming clears any previously captured body, so a stale download can
/// never satisfy a later export. Completions while unarmed are dropped.
#[derive(Default)]
struct ExportCapture {
    armed: AtomicBool,
    slot: Mutex<Option<CaptureOutcome>>,
    ready: Condvar,
}

impl ExportCapture {
    fn arm(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        self.armed.store(true, Ordering::SeqCst);
    }

    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn complete(&self, outcome: CaptureOutcome) {
        if !self.armed.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<CaptureOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        while slot.is_none() {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => break,
            };
            let (guard, _) = self
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        self.armed.store(false, Ordering::SeqCst);
        slot.take()
    }
}

/// A live portal session: one browser, one tab, strictly serial use.
pub struct Session {
    // Keeps the browser process alive for the lifetime of the session
    _browser: Browser,
    tab: Arc<Tab>,
    options: SessionOptions,
    capture: Arc<ExportCapture>,
    cookie_manager: CookieManager,
}

impl Session {
    /// Launch a browser and open the advanced-search start page.
    ///
    /// Registers the export response handler, primes the session with any
    /// persisted cookies, and dismisses the cookie-consent banner if shown.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser fails to launch or the start page
    /// cannot be reached.
    pub fn start(options: SessionOptions) -> Result<Self> {
        info!(headless = options.headless, "Launching browser");

        let mut builder = LaunchOptions::default_builder();
        builder
            .headless(options.headless)
            .sandbox(false)
            .window_size(Some((1600, 1000)))
            // The portal is slow and `cookies fetch` waits on a human login
            .idle_browser_timeout(Duration::from_secs(600));
        if let Some(ref proxy) = options.proxy {
            builder.proxy_server(Some(proxy.as_str()));
        }
        if let Some(ref path) = options.browser_path {
            builder.path(Some(path.clone()));
        }
        let launch = builder
            .build()
            .map_err(|e| WosError::Config(format!("Invalid launch options: {e}")))?;

        let browser = Browser::new(launch).map_err(browser_err)?;
        let tab = browser.new_tab().map_err(browser_err)?;
        tab.set_default_timeout(options.element_timeout);

        let capture = Arc::new(ExportCapture::default());
        let handler_capture = Arc::clone(&capture);
        tab.register_response_handling(
            "export-capture",
            Box::new(move |params, fetch_body| {
                if !params.response.url.contains(EXPORT_RESPONSE_URL) {
                    return;
                }
                if !handler_capture.is_armed() {
                    return;
                }
                debug!(url = %params.response.url, "Capturing export response");
                match fetch_body() {
                    Ok(body) => {
                        let decoded = decode_export_body(&body.body, body.base_64_encoded)
                            .map_err(|e| e.to_string());
                        handler_capture.complete(decoded);
                    }
                    Err(e) => handler_capture.complete(Err(e.to_string())),
                }
            }),
        )
        .map_err(browser_err)?;

        let cookie_manager = match options.cookie_file {
            Some(ref path) => CookieManager::with_path(path.clone()),
            None => CookieManager::default(),
        };

        let session = Self {
            _browser: browser,
            tab,
            options,
            capture,
            cookie_manager,
        };
        session.open_start_page()?;
        session.prime_cookies();
        session.reject_cookie_banner();
        info!("Session started");
        Ok(session)
    }

    fn start_url(&self) -> &str {
        self.options
            .start_url
            .as_deref()
            .unwrap_or(ADVANCED_SEARCH_URL)
    }

    fn open_start_page(&self) -> Result<()> {
        debug!(url = self.start_url(), "Opening advanced search");
        self.tab.navigate_to(self.start_url()).map_err(browser_err)?;
        self.tab.wait_until_navigated().map_err(browser_err)?;
        Ok(())
    }

    /// Inject persisted portal cookies and reload so they take effect.
    /// Best effort: priming failures only degrade to an anonymous session.
    fn prime_cookies(&self) {
        let cookies = self.cookie_manager.load_fresh();
        let portal: Vec<&Cookie> = cookies
            .iter()
            .filter(|c| is_portal_domain(&c.domain))
            .collect();
        if portal.is_empty() {
            return;
        }
        info!("Priming session with {} stored cookies", portal.len());
        for cookie in portal {
            let js = format!(
                "document.cookie = \"{}\"",
                js_string_escape(&cookie.to_document_cookie())
            );
            if let Err(e) = self.tab.evaluate(&js, false) {
                debug!(cookie = %cookie.name, error = %e, "Cookie injection failed");
            }
        }
        if let Err(e) = self
            .tab
            .reload(false, None)
            .and_then(|tab| tab.wait_until_navigated())
        {
            warn!(error = %e, "Reload after cookie priming failed");
        }
    }

    /// Dismiss the consent banner. The banner is absent once rejected in a
    /// primed session, so not finding it is fine.
    fn reject_cookie_banner(&self) {
        match self.tab.wait_for_element(COOKIE_REJECT_SELECTOR) {
            Ok(button) => match button.click() {
                Ok(_) => debug!("Cookie banner rejected"),
                Err(e) => warn!(error = %e, "Could not dismiss cookie banner"),
            },
            Err(_) => debug!("Cookie banner not shown"),
        }
    }

    /// Search the portal for a single DOI and land on its result page.
    ///
    /// Keystrokes do not reach the search field reliably, so the query is
    /// written into the DOM via JavaScript and submitted with a real
    /// keypress, then the session waits for the page transition.
    pub fn search_doi(&self, doi: &str) -> Result<()> {
        debug!(%doi, "Searching");
        let start_url = self.start_url().to_string();
        if self.tab.get_url() != start_url {
            self.open_start_page()?;
        }

        let input = self
            .tab
            .wait_for_element_with_custom_timeout(
                SEARCH_INPUT_SELECTOR,
                self.options.search_timeout,
            )
            .map_err(|_| WosError::ElementNotFound(SEARCH_INPUT_SELECTOR.to_string()))?;

        let js = format!(
            "document.getElementById(\"{}\").value = \"{}\"",
            SEARCH_INPUT_ID,
            js_string_escape(&build_doi_query(doi))
        );
        self.tab.evaluate(&js, false).map_err(browser_err)?;

        // The trailing space makes the Angular form notice the value
        input.type_into(" ").map_err(browser_err)?;
        self.tab.press_key("Enter").map_err(browser_err)?;

        self.wait_for_url_change(&start_url, self.options.search_timeout)?;
        self.tab.wait_until_navigated().map_err(browser_err)?;
        debug!(url = %self.tab.get_url(), "Result page reached");
        Ok(())
    }

    /// Trigger the server-side export on the current result page and
    /// capture the download.
    ///
    /// # Errors
    ///
    /// Fails if an element of the export chain is missing (also the case
    /// when the query matched no records) or the download times out.
    pub fn export_records(&self) -> Result<RecordTable> {
        debug!("Exporting records");
        self.capture.arm();

        for locator in EXPORT_CLICK_CHAIN {
            self.wait_and_click(locator)?;
        }

        let body = self
            .capture
            .wait(self.options.export_timeout)
            .ok_or_else(|| WosError::Export("download did not arrive in time".to_string()))?
            .map_err(WosError::Export)?;

        let table = RecordTable::from_tab_separated(&body)?;
        debug!(rows = table.row_count(), "Export parsed");
        Ok(table)
    }

    fn wait_and_click(&self, xpath: &str) -> Result<()> {
        let element = match self.tab.wait_for_xpath(xpath) {
            Ok(element) => element,
            Err(_) => {
                warn!(xpath, "Element not found");
                return Err(WosError::ElementNotFound(xpath.to_string()));
            }
        };
        element.click().map_err(browser_err)?;
        Ok(())
    }

    fn wait_for_url_change(&self, old_url: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while self.tab.get_url() == old_url {
            if Instant::now() >= deadline {
                return Err(WosError::Navigation(old_url.to_string()));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
        Ok(())
    }

    /// Href of the Citing-Articles link on the current result page, or
    /// `None` when the record has no citations. Relative links are
    /// resolved against the current page URL.
    pub fn citing_articles_url(&self) -> Result<Option<String>> {
        let html = self.tab.get_content().map_err(browser_err)?;
        let href = match find_citing_link(&html) {
            Some(href) => href,
            None => return Ok(None),
        };
        let current = self.tab.get_url();
        let resolved = Url::parse(&current)
            .and_then(|base| base.join(&href))
            .map_err(|e| WosError::Parse(format!("bad citing link {href}: {e}")))?;
        Ok(Some(resolved.to_string()))
    }

    /// Retrieve a DOI's full record and the records citing it.
    ///
    /// Returns one table where the record's own rows carry an empty
    /// `citing_doi` and the citing rows carry the searched DOI.
    pub fn fetch(&self, doi: &str) -> Result<RecordTable> {
        if !is_valid_doi(doi) {
            return Err(WosError::Validation(format!("not a DOI: {doi}")));
        }
        info!(%doi, "Fetching record and citing records");
        self.search_doi(doi)?;

        let mut combined = self.export_records()?;
        combined.set_constant_column(CITING_DOI_COLUMN, "");

        match self.citing_articles_url()? {
            Some(url) => {
                debug!(%url, "Citing articles link found");
                self.tab.navigate_to(&url).map_err(browser_err)?;
                self.tab.wait_until_navigated().map_err(browser_err)?;
                let mut citing = self.export_records()?;
                citing.set_constant_column(CITING_DOI_COLUMN, doi);
                combined.concat(citing);
            }
            None => info!(%doi, "No citing articles"),
        }

        Ok(combined)
    }

    /// Save the tab's current cookies so the next run can reuse the
    /// entitled session. Returns the number of cookies saved.
    pub fn harvest_cookies(&self) -> Result<usize> {
        let raw = self.tab.get_cookies().map_err(browser_err)?;
        let cookies: Vec<Cookie> = raw
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
                expires: if c.expires > 0.0 { Some(c.expires) } else { None },
            })
            .collect();
        let count = cookies.len();
        self.cookie_manager.save(&cookies)?;
        Ok(count)
    }
}

/// Check a value against the `10.<registrant>/<suffix>` DOI shape
pub fn is_valid_doi(doi: &str) -> bool {
    match Regex::new(DOI_SHAPE) {
        Ok(shape) => shape.is_match(doi.trim()),
        Err(_) => false,
    }
}

/// Build the advanced-search query for a DOI
pub(crate) fn build_doi_query(doi: &str) -> String {
    format!("DO=({})", doi.trim())
}

/// Escape a string for embedding in a double-quoted JavaScript literal
pub(crate) fn js_string_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode a captured response body. DevTools hands binary-ish bodies over
/// base64-encoded; content-encoding is already undone by the browser.
pub(crate) fn decode_export_body(body: &str, base_64_encoded: bool) -> Result<Vec<u8>> {
    if base_64_encoded {
        BASE64
            .decode(body.trim())
            .map_err(|e| WosError::Parse(format!("base64 decode failed: {e}")))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

/// Locate the Citing-Articles href in result-page HTML: the anchor inside
/// the citations data box whose label mentions citations.
pub(crate) fn find_citing_link(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let box_selector = Selector::parse("div.citations").ok()?;
    let label_selector = Selector::parse("div.data-box-text").ok()?;
    let link_selector = Selector::parse("a").ok()?;

    for data_box in document.select(&box_selector) {
        let labeled = data_box
            .select(&label_selector)
            .any(|label| label.text().collect::<String>().contains("Citation"));
        if !labeled {
            continue;
        }
        if let Some(link) = data_box.select(&link_selector).next() {
            if let Some(href) = link.value().attr("href") {
                return Some(href.to_string());
            }
        }
    }
    None
}

fn is_portal_domain(domain: &str) -> bool {
    domain.contains("webofscience") || domain.contains("clarivate")
}

fn browser_err(e: anyhow::Error) -> WosError {
    WosError::Browser(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_doi() {
        assert!(is_valid_doi("10.1103/PhysRevLett.116.061102"));
        assert!(is_valid_doi(" 10.1000/xyz123 "));
        assert!(!is_valid_doi("doi:10.1000/xyz123"));
        assert!(!is_valid_doi("10.12/too-short-registrant"));
        assert!(!is_valid_doi("not a doi"));
    }

    #[test]
    fn test_build_doi_query() {
        assert_eq!(build_doi_query(" 10.1000/xyz "), "DO=(10.1000/xyz)");
    }

    #[test]
    fn test_js_string_escape() {
        assert_eq!(js_string_escape(r#"10.1000/a"b\c"#), r#"10.1000/a\"b\\c"#);
        assert_eq!(js_string_escape("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_decode_export_body_plain() {
        let bytes = decode_export_body("AU\tTI", false).expect("decode failed");
        assert_eq!(bytes, b"AU\tTI");
    }

    #[test]
    fn test_decode_export_body_base64() {
        let bytes = decode_export_body("QVUJVEk=", true).expect("decode failed");
        assert_eq!(bytes, b"AU\tTI");
    }

    #[test]
    fn test_find_citing_link() {
        let html = r#"
            <div class="citations ng-star-inserted">
              <div class="font-size-14 data-box-text">128 Citations</div>
              <a href="/wos/woscc/citing-summary/WOS:000123456789">view</a>
            </div>"#;
        assert_eq!(
            find_citing_link(html).as_deref(),
            Some("/wos/woscc/citing-summary/WOS:000123456789")
        );
    }

    #[test]
    fn test_find_citing_link_ignores_unlabeled_boxes() {
        let html = r#"
            <div class="citations">
              <div class="data-box-text">128 References</div>
              <a href="/wos/woscc/references/WOS:000123456789">view</a>
            </div>"#;
        assert!(find_citing_link(html).is_none());
    }

    #[test]
    fn test_find_citing_link_absent() {
        assert!(find_citing_link("<html><body></body></html>").is_none());
    }

    #[test]
    fn test_capture_arm_wait_complete() {
        let capture = Arc::new(ExportCapture::default());
        capture.arm();
        let worker = Arc::clone(&capture);
        let handle = std::thread::spawn(move || worker.complete(Ok(vec![1, 2, 3])));
        let outcome = capture.wait(Duration::from_secs(1)).expect("no capture");
        assert_eq!(outcome.expect("capture errored"), vec![1, 2, 3]);
        handle.join().expect("worker panicked");
    }

    #[test]
    fn test_capture_ignores_unarmed_completion() {
        let capture = ExportCapture::default();
        capture.complete(Ok(vec![1]));
        assert!(capture.wait(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_capture_rearm_clears_stale_body() {
        let capture = ExportCapture::default();
        capture.arm();
        capture.complete(Ok(vec![1]));
        capture.arm();
        assert!(capture.wait(Duration::from_millis(50)).is_none());
    }
}
