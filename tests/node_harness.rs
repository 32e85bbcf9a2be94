//! Runs the embedded harness under a real `node` against a stub
//! `playwright` package, so module loading, export lookup, the crawl
//! timeout and the generated crawler's fallback chains are exercised
//! without a browser. Skipped when `node` is not installed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crawler_synth::analyzer::parse_analysis;
use crawler_synth::codegen::generate_crawler_code;
use crawler_synth::sandbox::{
    CrawlerRuntime, NodeRuntime, RunRequest, RuntimeEvent, RuntimeOutput, SandboxSettings, SandboxWorkspace,
};

const BOARD_URL: &str = "https://jobs.example.org/recruit/list.do";

/// Stand-in for playwright: pages are trees of handles read from
/// `site.json`, keyed by URL and then by the exact selector string.
const STUB_PLAYWRIGHT: &str = r#"const fs = require("fs");
const path = require("path");

const site = JSON.parse(fs.readFileSync(path.join(__dirname, "site.json"), "utf8"));

class Handle {
  constructor(node) {
    this.node = node;
  }
  async $$(selector) {
    const children = (this.node.children || {})[selector] || [];
    return children.map((child) => new Handle(child));
  }
  async $(selector) {
    const found = await this.$$(selector);
    return found.length > 0 ? found[0] : null;
  }
  async getAttribute(name) {
    const attrs = this.node.attrs || {};
    return name in attrs ? attrs[name] : null;
  }
  async evaluate(fn) {
    const text = this.node.text || "";
    return fn({ innerText: text, textContent: text });
  }
}

class Page {
  constructor() {
    this.current = null;
  }
  on() {}
  async goto(url) {
    if (!(url in site.pages)) throw new Error(`net::ERR_NAME_NOT_RESOLVED at ${url}`);
    this.current = new Handle({ children: site.pages[url] });
  }
  async $$(selector) {
    return this.current ? this.current.$$(selector) : [];
  }
  async $(selector) {
    return this.current ? this.current.$(selector) : null;
  }
  async screenshot() {
    return Buffer.from("stub screenshot");
  }
}

module.exports = {
  chromium: {
    async launch() {
      return {
        async newPage() {
          return new Page();
        },
        async close() {},
      };
    },
  },
};
"#;

fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Directory holding `node_modules/playwright` backed by `site`
fn stub_modules(root: &Path, site: &Value) -> PathBuf {
    let package = root.join("modules").join("node_modules").join("playwright");
    std::fs::create_dir_all(&package).unwrap();
    std::fs::write(
        package.join("package.json"),
        r#"{ "name": "playwright", "version": "0.0.0-stub", "main": "index.js" }"#,
    )
    .unwrap();
    std::fs::write(package.join("index.js"), STUB_PLAYWRIGHT).unwrap();
    std::fs::write(package.join("site.json"), site.to_string()).unwrap();
    root.join("modules")
}

async fn run_module(code: &str, site: &Value, config: Value, crawl_timeout: Duration) -> RuntimeOutput {
    let root = tempfile::tempdir().unwrap();
    let modules = stub_modules(root.path(), site);
    let workspace = SandboxWorkspace::create(&root.path().join("runs"), "stub").unwrap();
    let module_path = workspace.write_module(code).unwrap();

    let runtime = NodeRuntime::new("node")
        .launch_grace(Duration::from_secs(20))
        .modules_dir(Some(modules));
    let request = RunRequest {
        module_path,
        workspace: workspace.path().to_path_buf(),
        config,
        crawl_timeout,
        headless: true,
    };
    runtime.run(&request).await.unwrap()
}

fn fatal(output: &RuntimeOutput) -> Option<&str> {
    output.events.iter().find_map(|event| match event {
        RuntimeEvent::Fatal { message } => Some(message.as_str()),
        _ => None,
    })
}

fn items(output: &RuntimeOutput) -> Option<&Value> {
    output.events.iter().find_map(|event| match event {
        RuntimeEvent::Result { items } => Some(items),
        _ => None,
    })
}

fn screenshot_taken(output: &RuntimeOutput) -> bool {
    output
        .events
        .iter()
        .any(|event| matches!(event, RuntimeEvent::Screenshot { .. }))
}

fn basic_config() -> Value {
    json!({ "url": BOARD_URL, "baseUrl": BOARD_URL, "name": "city", "crawlBatchSize": 1 })
}

#[tokio::test]
async fn test_module_without_function_export() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let output = run_module(
        "export const answer = 42;\n",
        &json!({ "pages": {} }),
        basic_config(),
        Duration::from_secs(10),
    )
    .await;

    assert!(!output.timed_out, "stderr: {}", output.stderr);
    assert_eq!(fatal(&output), Some("crawler function not found"));
    assert!(items(&output).is_none());
    assert!(screenshot_taken(&output));
}

#[tokio::test]
async fn test_default_export_is_called() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let code = "export default async function (page, config) {\n  \
                console.log(`crawling ${config.name}`);\n  \
                return [{ title: config.name, batch: config.crawlBatchSize }];\n}\n";
    let output = run_module(code, &json!({ "pages": {} }), basic_config(), Duration::from_secs(10)).await;

    assert_eq!(fatal(&output), None, "stderr: {}", output.stderr);
    assert_eq!(items(&output), Some(&json!([{ "title": "city", "batch": 1 }])));
    assert!(output.events.contains(&RuntimeEvent::Console {
        level: "log".to_string(),
        text: "crawling city".to_string(),
    }));
    assert_eq!(output.exit_code, Some(0));
}

#[tokio::test]
async fn test_slow_crawl_hits_the_crawl_timeout() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    let code = "export async function crawl() {\n  \
                return new Promise((resolve) => setTimeout(() => resolve([]), 10000));\n}\n";
    let started = std::time::Instant::now();
    let output = run_module(code, &json!({ "pages": {} }), basic_config(), Duration::from_millis(300)).await;

    assert!(!output.timed_out, "the harness should stop the crawl before the process deadline");
    assert_eq!(fatal(&output), Some("crawl timed out after 300 ms"));
    assert!(items(&output).is_none());
    assert!(started.elapsed() < Duration::from_secs(9));
}

fn drifted_site() -> Value {
    let row = |id: &str, title: &str, wrong_date: &str, date: &str| {
        json!({
            "attrs": { "data-id": id },
            "children": {
                "td.subject a": [{ "text": title, "attrs": { "href": "javascript:void(0)" } }],
                "td.day": [{ "text": wrong_date }],
                "span.posted": [{ "text": date }],
            }
        })
    };
    json!({
        "pages": {
            BOARD_URL: {
                "tbody tr": [
                    row("41", "Night shift nurse for the...", "old", "2024-03-01"),
                    row("42", "Lab technician", "old", "2024-03-02"),
                ],
                "tr": [],
            },
            "https://jobs.example.org/recruit/view.do?seq=41": {
                "h3": [{ "text": "Night shift nurse for the geriatric ward" }],
                "div.view": [{ "text": "Rotating night shifts in the geriatric ward, three nights a week." }],
            },
            "https://jobs.example.org/recruit/view.do?seq=42": {
                "h3": [{ "text": "Lab technician" }],
                "div.view": [{ "text": "Sample handling and routine blood work for the outpatient clinic." }],
                ".file a": [{ "text": "form.hwp", "attrs": { "href": "/files/form.hwp" } }],
            },
        }
    })
}

#[tokio::test]
async fn test_generated_crawler_falls_back_when_rows_drift() {
    if !node_available() {
        eprintln!("node not installed, skipping");
        return;
    }

    // the analyzed row class no longer matches anything on the page
    let analysis = parse_analysis(
        r#"{
          "mostSimilarPattern": "B",
          "confidence": 0.8,
          "listPage": {
            "containerSelector": "table.jobs",
            "rowSelector": "tr.posting",
            "titleSelector": "td.subject a",
            "dateSelector": "td.day",
            "linkExtraction": { "method": "data-id", "attribute": "data-id" },
            "paginationType": "query"
          },
          "detailPage": { "contentSelector": "div.view", "attachmentSelector": "", "titleSelector": "h3" }
        }"#,
    )
    .unwrap();
    let generated = generate_crawler_code(&analysis, "city").unwrap();

    let mut settings = SandboxSettings {
        batch_size: 5,
        detail_url_template: Some("{origin}/recruit/view.do?seq={id}".to_string()),
        ..SandboxSettings::default()
    };
    settings
        .selector_overrides
        .insert("date".to_string(), "span.posted".to_string());
    let config = settings.crawl_config(BOARD_URL, "city");

    let output = run_module(&generated.code, &drifted_site(), config, Duration::from_secs(10)).await;

    assert_eq!(fatal(&output), None, "stderr: {}", output.stderr);
    let items = items(&output).expect("crawler returned no result");
    assert_eq!(
        items,
        &json!([
            {
                "title": "Night shift nurse for the geriatric ward",
                "date": "2024-03-01",
                "link": "https://jobs.example.org/recruit/view.do?seq=41",
                "detailContent": "Rotating night shifts in the geriatric ward, three nights a week.",
                "attachmentUrl": null,
                "board": "city",
            },
            {
                "title": "Lab technician",
                "date": "2024-03-02",
                "link": "https://jobs.example.org/recruit/view.do?seq=42",
                "detailContent": "Sample handling and routine blood work for the outpatient clinic.",
                "attachmentUrl": "https://jobs.example.org/files/form.hwp",
                "board": "city",
            }
        ])
    );
    assert!(output.events.contains(&RuntimeEvent::Console {
        level: "log".to_string(),
        text: "city: collected 2 item(s)".to_string(),
    }));
}
