// Report generation from database

use crate::data::{Database, SessionSummary};
use rusqlite::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use waymark_scanner::explorer::RunStats;
use waymark_scanner::hierarchy::HierarchyEdge;
use waymark_scanner::registry::{DiscoveredEntity, EntityId};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub session: SessionSummary,
    pub entities: Vec<DiscoveredEntity>,
    pub edges: Vec<HierarchyEdge>,
}

pub fn gather_report_data(db: &Database, session_id: &str) -> Result<ReportData> {
    let session = db
        .get_session(session_id)?
        .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    let entities = db.load_entities(session_id)?;
    let edges = db.load_edges(session_id)?;

    Ok(ReportData {
        session,
        entities,
        edges,
    })
}

impl ReportData {
    fn status_to_string(&self) -> &str {
        match self.session.status.as_str() {
            "completed" => "Completed",
            "bound_reached" => "Bound reached",
            "failed" => "Failed",
            "running" => "Running",
            "cancelled" => "Cancelled",
            _ => "Unknown",
        }
    }

    /// Runs that stopped early only hold what was found before the stop.
    pub fn is_partial(&self) -> bool {
        matches!(self.session.status.as_str(), "failed" | "cancelled")
    }

    pub fn roots(&self) -> Vec<&DiscoveredEntity> {
        self.entities.iter().filter(|e| e.parents.is_empty()).collect()
    }

    fn entity(&self, id: EntityId) -> Option<&DiscoveredEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    fn stats(&self) -> RunStats {
        self.session.stats.clone().unwrap_or_default()
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();
    let stats = data.stats();

    report.push_str(RULE);
    report.push_str("                        WAYMARK EXPLORATION REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Session ID:   {}\n", data.session.id));
    report.push_str(&format!("Status:       {}\n", data.status_to_string()));
    if let Some(ref termination) = data.session.termination {
        report.push_str(&format!("Stopped:      {}\n", termination.replace('_', " ")));
    }
    report.push_str(&format!("Started:      {}\n", format_timestamp(data.session.start_time)));
    if let Some(end_time) = data.session.end_time {
        report.push_str(&format!(
            "Duration:     {} seconds\n",
            end_time - data.session.start_time
        ));
    }
    report.push_str(&format!("Target:       {}\n", data.session.seed_url));
    if data.is_partial() {
        report.push_str("Note:         partial results, the run did not finish\n");
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("  Entities found:    {}\n", data.entities.len()));
    report.push_str(&format!("  Relationships:     {}\n", data.edges.len()));
    report.push_str(&format!("  States explored:   {}\n", stats.states_explored));
    report.push_str(&format!("  Paths shortened:   {}\n", stats.paths_shortened));
    report.push_str(&format!("  Steps repaired:    {}\n", stats.repairs));
    report.push_str(&format!("  Replay failures:   {}\n", stats.replay_failures));
    let stale = data.entities.iter().filter(|e| e.stale).count();
    if stale > 0 {
        report.push_str(&format!("  Stale paths:       {}\n", stale));
    }
    report.push('\n');

    report.push_str(RULE);
    report.push_str("HIERARCHY\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&generate_hierarchy_tree(data));
    report.push('\n');

    if !data.entities.is_empty() {
        report.push_str(RULE);
        report.push_str("ENTITIES\n");
        report.push_str(RULE);
        report.push('\n');

        for entity in &data.entities {
            report.push_str(&format!("[{}] {}\n", entity.id.0 + 1, entity.name));
            report.push_str(&format!("Address:      {}\n", entity.address));
            report.push_str(&format!("Depth:        {}\n", entity.depth));
            report.push_str(&format!("Path:         {}\n", entity.path));
            if !entity.relationship_field_names.is_empty() {
                let fields: Vec<&str> = entity
                    .relationship_field_names
                    .iter()
                    .map(String::as_str)
                    .collect();
                report.push_str(&format!("Fields:       {}\n", fields.join(", ")));
            }
            if entity.stale {
                report.push_str("Stale:        yes\n");
            }
            report.push_str("\n────────────────────────────────────────────────────────────────────────────────\n\n");
        }
    }

    report.push_str(RULE);
    report.push_str("                          End of Report\n");
    report.push_str(RULE);
    report.push_str("\nGenerated by Waymark\n\n");

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Waymark",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "format": "json"
            },
            "session": {
                "id": data.session.id,
                "status": data.session.status,
                "termination": data.session.termination,
                "partial": data.is_partial(),
                "start_time": format_iso8601_timestamp(data.session.start_time),
                "end_time": data.session.end_time.map(format_iso8601_timestamp),
                "duration_seconds": data.session.end_time.map(|end| end - data.session.start_time),
                "target": data.session.seed_url
            },
            "summary": {
                "total_entities": data.entities.len(),
                "total_relationships": data.edges.len(),
                "roots": data.roots().iter().map(|e| e.id).collect::<Vec<_>>(),
                "stats": data.session.stats
            },
            "entities": data.entities,
            "edges": data.edges
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_markdown_report(data: &ReportData) -> String {
    let mut report = String::new();
    let stats = data.stats();

    report.push_str("# Waymark Exploration Report\n\n");
    report.push_str(&format!("- **Session:** `{}`\n", data.session.id));
    report.push_str(&format!("- **Target:** {}\n", data.session.seed_url));
    report.push_str(&format!("- **Status:** {}\n", data.status_to_string()));
    report.push_str(&format!("- **Started:** {}\n", format_timestamp(data.session.start_time)));
    if data.is_partial() {
        report.push_str("- **Partial:** yes\n");
    }
    report.push('\n');

    report.push_str("## Summary\n\n");
    report.push_str("| Metric | Value |\n|---|---|\n");
    report.push_str(&format!("| Entities | {} |\n", data.entities.len()));
    report.push_str(&format!("| Relationships | {} |\n", data.edges.len()));
    report.push_str(&format!("| States explored | {} |\n", stats.states_explored));
    report.push_str(&format!("| Paths shortened | {} |\n", stats.paths_shortened));
    report.push_str(&format!("| Steps repaired | {} |\n\n", stats.repairs));

    report.push_str("## Hierarchy\n\n```\n");
    report.push_str(&generate_hierarchy_tree(data));
    report.push_str("```\n\n");

    if !data.entities.is_empty() {
        report.push_str("## Entities\n\n");
        report.push_str("| # | Name | Address | Depth | Path | Fields |\n");
        report.push_str("|---|---|---|---|---|---|\n");
        for entity in &data.entities {
            let fields: Vec<&str> = entity
                .relationship_field_names
                .iter()
                .map(String::as_str)
                .collect();
            let name = if entity.stale {
                format!("{} (stale)", entity.name)
            } else {
                entity.name.clone()
            };
            report.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                entity.id.0 + 1,
                escape_cell(&name),
                escape_cell(&entity.address),
                entity.depth,
                escape_cell(&entity.path.to_string()),
                escape_cell(&fields.join(", "))
            ));
        }
        report.push('\n');
    }

    report
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Roots first, children indented below their parents. An entity with
/// several parents shows up under each of them; cycles are cut.
pub fn generate_hierarchy_tree(data: &ReportData) -> String {
    if data.entities.is_empty() {
        return "  (empty)\n".to_string();
    }

    let mut result = String::new();
    let mut roots = data.roots();
    if roots.is_empty() {
        // Every entity has a parent, so the graph is one big cycle.
        roots = data.entities.iter().take(1).collect();
    }

    for (i, root) in roots.iter().enumerate() {
        let is_last = i == roots.len() - 1;
        let mut trail = BTreeSet::new();
        render_node(data, root, "", is_last, &mut trail, &mut result);
    }
    result
}

fn render_node(
    data: &ReportData,
    entity: &DiscoveredEntity,
    prefix: &str,
    is_last: bool,
    trail: &mut BTreeSet<EntityId>,
    out: &mut String,
) {
    let branch = if is_last { "└── " } else { "├── " };
    let marker = if entity.stale { " [stale]" } else { "" };
    out.push_str(&format!(
        "{}{}{}  ({}){}\n",
        prefix, branch, entity.name, entity.address, marker
    ));

    if !trail.insert(entity.id) {
        return;
    }

    let children: Vec<&DiscoveredEntity> = entity
        .children
        .iter()
        .filter(|id| !trail.contains(id))
        .filter_map(|id| data.entity(*id))
        .collect();
    let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
    for (i, child) in children.iter().enumerate() {
        render_node(data, child, &child_prefix, i == children.len() - 1, trail, out);
    }

    trail.remove(&entity.id);
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.to_rfc3339()
}
