//! reelmatch-cli: operator frontend for the Reelmatch HTTP API
//!
//! # Subcommands
//! - `sync <asset-id> --tenant <id>`                  embed an asset once
//! - `search (--text <q> | --asset <id>) --tenant <id> [-n <k>] [--json]`
//! - `purge <tenant-id>...`                           delete vectors by tenant tag
//! - `purge-all --tenant <id> --yes`                  wipe the whole namespace
//! - `status`                                         show server health

use clap::{ArgGroup, Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "reelmatch-cli", version, about = "Reelmatch video ad similarity CLI")]
struct Cli {
    /// Reelmatch HTTP server URL (overrides REELMATCH_HTTP_URL env var)
    #[arg(long, env = "REELMATCH_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 180)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate and store embeddings for an asset (no-op if already stored)
    Sync {
        asset_id: String,

        #[arg(long)]
        tenant: String,
    },

    /// Find similar clips by text or by an existing asset
    #[command(group(ArgGroup::new("mode").required(true).args(["text", "asset"])))]
    Search {
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        asset: Option<String>,

        #[arg(long)]
        tenant: String,

        /// Maximum number of results (server default when omitted)
        #[arg(short = 'n', long)]
        top_k: Option<usize>,

        /// Print the raw JSON array
        #[arg(long)]
        json: bool,
    },

    /// Delete every vector tagged with the given tenant index ids
    Purge {
        #[arg(required = true)]
        tenants: Vec<String>,
    },

    /// Delete every vector in the namespace (irreversible)
    PurgeAll {
        #[arg(long)]
        tenant: String,

        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Show Reelmatch server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub metadata: HitMetadata,
}

#[derive(Debug, Deserialize)]
pub struct HitMetadata {
    pub asset_file: String,
    pub source_asset_id: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted_count: usize,
    pub may_be_incomplete: bool,
    #[serde(default)]
    pub incomplete_tenants: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============================================================================
// Request building / formatting (pure)
// ============================================================================

pub fn search_body(
    text: Option<&str>,
    asset: Option<&str>,
    tenant: &str,
    top_k: Option<usize>,
) -> Value {
    let mut body = json!({ "tenantIndexId": tenant });
    if let Some(text) = text {
        body["queryText"] = json!(text);
    }
    if let Some(asset) = asset {
        body["assetId"] = json!(asset);
    }
    if let Some(k) = top_k {
        body["topK"] = json!(k);
    }
    body
}

/// One line per hit: rank, score, asset, time range.
pub fn format_hit(rank: usize, hit: &SearchHit) -> String {
    format!(
        "{:>2}. {:.3}  {}  ({})  {:.1}s-{:.1}s  [{}]",
        rank,
        hit.score,
        hit.metadata.asset_file,
        hit.metadata.source_asset_id,
        hit.metadata.start_time,
        hit.metadata.end_time,
        hit.id
    )
}

pub fn format_delete_report(report: &DeleteReport) -> String {
    let mut out = format!("Deleted {} vectors", report.deleted_count);
    if report.may_be_incomplete {
        out.push_str(&format!(
            "\nWARNING: purge may be incomplete for: {}",
            report.incomplete_tenants.join(", ")
        ));
    }
    for w in &report.warnings {
        out.push_str(&format!("\n  {}", w));
    }
    out
}

/// Render an error body as `error: details`, plus partial counts if present.
pub fn format_error(status: u16, body: &Value) -> String {
    let error = body["error"].as_str().unwrap_or("request failed");
    let mut out = match body["details"].as_str() {
        Some(details) => format!("server returned {}: {}: {}", status, error, details),
        None => format!("server returned {}: {}", status, error),
    };
    for key in ["written", "deletedCount", "completed"] {
        if let Some(n) = body[key].as_u64() {
            out.push_str(&format!(" ({}={})", key, n));
        }
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    server: String,
}

impl Api {
    fn new(server: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
        })
    }

    fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| anyhow::anyhow!("connection failed to {}: {}", url, e))?;
        let status = resp.status();
        let body: Value = resp.json().unwrap_or(Value::Null);
        if !status.is_success() {
            anyhow::bail!(format_error(status.as_u16(), &body));
        }
        Ok(body)
    }
}

fn do_sync(api: &Api, asset_id: &str, tenant: &str) -> anyhow::Result<()> {
    let body = api.post(
        "/embeddings/sync",
        &json!({ "assetId": asset_id, "tenantIndexId": tenant }),
    )?;
    if body["skipped"].as_bool().unwrap_or(false) {
        println!("{} already embedded, skipped", asset_id);
    } else {
        println!(
            "{}: wrote {} vectors",
            asset_id,
            body["written"].as_u64().unwrap_or(0)
        );
    }
    Ok(())
}

fn do_search(api: &Api, request: Value, json_output: bool) -> anyhow::Result<()> {
    let body = api.post("/search/similar", &request)?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let hits: Vec<SearchHit> = serde_json::from_value(body)?;
    if hits.is_empty() {
        eprintln!("No results found");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}", format_hit(i + 1, hit));
    }
    Ok(())
}

fn do_purge(api: &Api, tenants: &[String]) -> anyhow::Result<()> {
    let body = api.post(
        "/maintenance/deleteByTenant",
        &json!({ "tenantIndexIds": tenants }),
    )?;
    let report: DeleteReport = serde_json::from_value(body)?;
    println!("{}", format_delete_report(&report));
    Ok(())
}

fn do_purge_all(api: &Api, tenant: &str, confirmed: bool) -> anyhow::Result<()> {
    if !confirmed {
        anyhow::bail!("purge-all deletes every vector in the namespace; re-run with --yes to confirm");
    }
    api.post("/maintenance/deleteAll", &json!({ "tenantIndexId": tenant }))?;
    println!("Namespace purged");
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(api: &Api) -> anyhow::Result<()> {
    let url = format!("{}/health", api.server);
    match api.client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: Value = r.json().unwrap_or_default();
            println!("Reelmatch server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:          {}", body["version"].as_str().unwrap_or("?"));
            println!("Vector store:     {}", body["store"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            anyhow::bail!("server unhealthy (HTTP {})", r.status());
        }
        Err(e) => {
            anyhow::bail!("cannot reach {}: {}", url, e);
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Api::new(&cli.server, cli.timeout).and_then(|api| match cli.command {
        Commands::Sync { asset_id, tenant } => do_sync(&api, &asset_id, &tenant),
        Commands::Search {
            text,
            asset,
            tenant,
            top_k,
            json,
        } => do_search(
            &api,
            search_body(text.as_deref(), asset.as_deref(), &tenant, top_k),
            json,
        ),
        Commands::Purge { tenants } => do_purge(&api, &tenants),
        Commands::PurgeAll { tenant, yes } => do_purge_all(&api, &tenant, yes),
        Commands::Status => do_status(&api),
    });

    if let Err(e) = result {
        eprintln!("reelmatch-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            score,
            metadata: HitMetadata {
                asset_file: "Beach Day.mp4".to_string(),
                source_asset_id: "vid-1".to_string(),
                start_time: 6.0,
                end_time: 12.0,
            },
        }
    }

    #[test]
    fn test_search_body_text_mode() {
        let body = search_body(Some("sunset"), None, "idx-a", Some(3));
        assert_eq!(body["queryText"], "sunset");
        assert_eq!(body["tenantIndexId"], "idx-a");
        assert_eq!(body["topK"], 3);
        assert!(body.get("assetId").is_none());
    }

    #[test]
    fn test_search_body_asset_mode_without_top_k() {
        let body = search_body(None, Some("vid-9"), "idx-a", None);
        assert_eq!(body["assetId"], "vid-9");
        assert!(body.get("queryText").is_none());
        assert!(body.get("topK").is_none());
    }

    #[test]
    fn test_format_hit_contains_fields() {
        let line = format_hit(1, &hit("Beach_Day_mp4_1", 0.8766));
        assert!(line.starts_with(" 1. 0.877"));
        assert!(line.contains("Beach Day.mp4"));
        assert!(line.contains("6.0s-12.0s"));
        assert!(line.ends_with("[Beach_Day_mp4_1]"));
    }

    #[test]
    fn test_search_hit_parses_server_payload() {
        let payload = json!([{
            "id": "a_0",
            "score": 0.9,
            "metadata": {
                "asset_file": "a.mp4",
                "segment_index": 0,
                "start_time": 0.0,
                "end_time": 6.0,
                "scope": "clip",
                "source_asset_id": "A",
                "tenant_index_id": "idx-a"
            }
        }]);
        let hits: Vec<SearchHit> = serde_json::from_value(payload).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source_asset_id, "A");
    }

    #[test]
    fn test_delete_report_warns_when_incomplete() {
        let report = DeleteReport {
            deleted_count: 1000,
            may_be_incomplete: true,
            incomplete_tenants: vec!["idx-big".to_string()],
            warnings: vec!["tenant idx-big still matched a full page".to_string()],
        };
        let text = format_delete_report(&report);
        assert!(text.starts_with("Deleted 1000 vectors"));
        assert!(text.contains("WARNING"));
        assert!(text.contains("idx-big"));
    }

    #[test]
    fn test_delete_report_complete_has_no_warning() {
        let report = DeleteReport {
            deleted_count: 3,
            may_be_incomplete: false,
            incomplete_tenants: Vec::new(),
            warnings: Vec::new(),
        };
        assert_eq!(format_delete_report(&report), "Deleted 3 vectors");
    }

    #[test]
    fn test_format_error_includes_partial_counts() {
        let body = json!({
            "error": "Operation partially completed",
            "details": "delete stopped after 2000 items",
            "deletedCount": 2000,
        });
        let text = format_error(500, &body);
        assert!(text.contains("500"));
        assert!(text.contains("Operation partially completed"));
        assert!(text.contains("deletedCount=2000"));
    }

    #[test]
    fn test_format_error_without_body() {
        assert_eq!(format_error(502, &Value::Null), "server returned 502: request failed");
    }

    #[test]
    fn test_cli_requires_search_mode() {
        let parsed = Cli::try_parse_from(["reelmatch-cli", "search", "--tenant", "idx-a"]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "reelmatch-cli",
            "search",
            "--text",
            "a",
            "--asset",
            "b",
            "--tenant",
            "idx-a",
        ]);
        assert!(parsed.is_err(), "text and asset are mutually exclusive");
    }

    #[test]
    fn test_cli_parses_purge_all() {
        let cli = Cli::try_parse_from(["reelmatch-cli", "purge-all", "--tenant", "idx-a", "--yes"])
            .unwrap();
        match cli.command {
            Commands::PurgeAll { tenant, yes } => {
                assert_eq!(tenant, "idx-a");
                assert!(yes);
            }
            other => panic!("Expected PurgeAll, got {:?}", other),
        }
    }
}
