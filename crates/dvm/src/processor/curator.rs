//! Memory curator (kind 5700)
//!
//! Reads an agent's daily log, pulls out lessons, tools, connections and
//! stats, compares them with the long-term memory file and suggests what
//! is worth adding.

use super::{JobProcessor, ProcessorOutput};
use crate::error::{Result, ValidationError};
use crate::inputs::JobInputs;
use nostr::KIND_JOB_MEMORY_CURATION;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt::Write;
use std::str::FromStr;

const DEFAULT_MAX_ITEMS: usize = 5;
const MIN_LESSON_CHARS: usize = 50;
const MAX_ITEM_CHARS: usize = 150;

/// Suggestion section keys accepted by the `sections` param.
const SECTION_KEYS: &[&str] = &["tools", "connections", "learnings", "content", "stats"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurationStyle {
    #[default]
    Concise,
    Detailed,
}

impl FromStr for CurationStyle {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concise" => Ok(CurationStyle::Concise),
            "detailed" => Ok(CurationStyle::Detailed),
            other => Err(ValidationError::invalid_input(format!(
                "unknown style '{other}', expected concise or detailed"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CurationParams {
    style: CurationStyle,
    max_items: usize,
    /// None means every section
    sections: Option<HashSet<String>>,
}

impl CurationParams {
    fn from_inputs(inputs: &JobInputs) -> std::result::Result<Self, ValidationError> {
        let style = match inputs.param("style") {
            Some(style) => style.parse()?,
            None => CurationStyle::default(),
        };

        let max_items = match inputs.param("max_items") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ValidationError::invalid_input(format!(
                        "max_items must be a positive integer, got '{raw}'"
                    )));
                }
            },
            None => DEFAULT_MAX_ITEMS,
        };

        let sections = match inputs.param("sections") {
            Some(raw) => {
                let keys: HashSet<String> = raw
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
                if let Some(unknown) = keys.iter().find(|k| !SECTION_KEYS.contains(&k.as_str())) {
                    return Err(ValidationError::invalid_input(format!(
                        "unknown section '{unknown}', expected any of {}",
                        SECTION_KEYS.join(", ")
                    )));
                }
                (!keys.is_empty()).then_some(keys)
            }
            None => None,
        };

        Ok(Self {
            style,
            max_items,
            sections,
        })
    }

    fn wants(&self, section: &str) -> bool {
        self.sections
            .as_ref()
            .is_none_or(|keys| keys.contains(section))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Clock time for timestamped lines
    pub time: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    pub name: String,
    pub description: String,
}

/// Everything pulled out of one daily log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extraction {
    pub events: Vec<LogEntry>,
    pub lessons: Vec<String>,
    pub decisions: Vec<String>,
    pub connections: Vec<Connection>,
    pub tools: Vec<String>,
    pub content: Vec<String>,
    pub blockers: Vec<String>,
    /// Stat name and value, in first-seen order
    pub stats: Vec<(String, u64)>,
}

impl Extraction {
    fn set_stat(&mut self, key: &str, value: u64) {
        match self.stats.iter_mut().find(|(k, _)| k == key) {
            Some(stat) => stat.1 = value,
            None => self.stats.push((key.to_string(), value)),
        }
    }
}

/// One block of `## Suggested Additions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Memory section the items belong in
    pub section: String,
    pub items: Vec<String>,
    pub reason: String,
}

/// Kind 5700 processor.
pub struct MemoryCurator {
    timestamp: Regex,
    dated_timestamp: Regex,
    stat_patterns: Vec<(Regex, &'static str)>,
    connection: Regex,
    tool_name: Regex,
}

impl MemoryCurator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            timestamp: compile(r"(?i)^-?\s*\[(\d{1,2}:\d{2}(?::\d{2})?)\]\s*(.+)")?,
            dated_timestamp: compile(r"(?i)^-?\s*\[[\d-]+\s+(\d{1,2}:\d{2})\]\s*(.+)")?,
            stat_patterns: vec![
                (compile(r"(?i)(\d+)\s*notes?")?, "nostr_notes"),
                (compile(r"(?i)(\d+)\s*sats")?, "sats"),
                (compile(r"(?i)(\d+)\s*tools?")?, "tools_count"),
            ],
            connection: compile(r"\*\*([A-Za-z0-9_-]+)\*\*\s*[—-]\s*(.+)")?,
            tool_name: compile(r"(?i)([a-z-]+\.mjs)")?,
        })
    }

    /// Pull entries, stats and connections out of a daily log.
    pub fn extract(&self, log: &str) -> Extraction {
        let mut extracted = Extraction::default();

        for line in log.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(entry) = self.timestamped_entry(trimmed) {
                classify(&entry.text, &mut extracted);
                extracted.events.push(entry);
                continue;
            }

            let mut matched_stat = false;
            for (pattern, key) in &self.stat_patterns {
                if let Some(value) = pattern
                    .captures(trimmed)
                    .and_then(|c| c[1].parse::<u64>().ok())
                {
                    extracted.set_stat(key, value);
                    matched_stat = true;
                }
            }

            let connection = self.connection.captures(trimmed).map(|c| Connection {
                name: c[1].to_string(),
                description: c[2].trim().to_string(),
            });
            let is_connection = connection.is_some();
            if let Some(connection) = connection {
                extracted.connections.push(connection);
            }

            let lower = trimmed.to_lowercase();
            let key_insight = lower.contains("key insight") || lower.contains("key learning");

            if !matched_stat && !is_connection {
                if let Some(text) = bullet_text(trimmed) {
                    let lessons_before = extracted.lessons.len();
                    classify(text, &mut extracted);
                    extracted.events.push(LogEntry {
                        time: None,
                        text: text.to_string(),
                    });
                    if key_insight && extracted.lessons.len() > lessons_before {
                        continue;
                    }
                }
            }

            if key_insight {
                extracted.lessons.push(trimmed.to_string());
            }
        }

        extracted
    }

    fn timestamped_entry(&self, line: &str) -> Option<LogEntry> {
        let captures = self
            .timestamp
            .captures(line)
            .or_else(|| self.dated_timestamp.captures(line))?;
        Some(LogEntry {
            time: Some(captures[1].to_string()),
            text: captures[2].to_string(),
        })
    }

    fn suggest(
        &self,
        extracted: &Extraction,
        memory_sections: &[(String, String)],
        params: &CurationParams,
    ) -> Vec<Suggestion> {
        let memory = memory_sections
            .iter()
            .map(|(_, body)| body.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let memory_lower = memory.to_lowercase();
        let mut suggestions = Vec::new();

        if params.wants("tools") {
            let new_tools: Vec<String> = extracted
                .tools
                .iter()
                .filter(|line| match self.tool_name.captures(line) {
                    Some(name) => !memory.contains(&name[1]),
                    None => !memory_lower.contains(&line.to_lowercase()),
                })
                .take(params.max_items)
                .cloned()
                .collect();
            push_suggestion(&mut suggestions, "What I Built", new_tools, "New tools created");
        }

        if params.wants("connections") {
            let new_connections: Vec<String> = extracted
                .connections
                .iter()
                .filter(|c| !memory_lower.contains(&c.name.to_lowercase()))
                .take(params.max_items)
                .map(|c| format!("**{}** — {}", c.name, c.description))
                .collect();
            push_suggestion(
                &mut suggestions,
                "Key Connections",
                new_connections,
                "New agents/people encountered",
            );
        }

        if params.wants("learnings") {
            let mut seen = HashSet::new();
            let lessons: Vec<String> = extracted
                .lessons
                .iter()
                .filter(|lesson| seen.insert(lesson.as_str()))
                .filter(|lesson| lesson.chars().count() > MIN_LESSON_CHARS)
                .take(params.max_items)
                .cloned()
                .collect();
            push_suggestion(
                &mut suggestions,
                "Key Learnings",
                lessons,
                "Insights worth preserving",
            );
        }

        if params.wants("content") {
            let content: Vec<String> = extracted
                .content
                .iter()
                .take(params.max_items)
                .cloned()
                .collect();
            push_suggestion(
                &mut suggestions,
                "Content Created",
                content,
                "Guides/documentation written",
            );
        }

        suggestions
    }

    fn format(
        &self,
        extracted: &Extraction,
        suggestions: &[Suggestion],
        params: &CurationParams,
    ) -> String {
        let mut out = String::new();

        if !suggestions.is_empty() {
            out.push_str("## Suggested Additions\n\n");
            for suggestion in suggestions {
                let _ = writeln!(out, "### → {}", suggestion.section);
                if params.style == CurationStyle::Detailed {
                    let _ = write!(out, "*Reason: {}*\n\n", suggestion.reason);
                }
                for item in &suggestion.items {
                    let _ = writeln!(out, "- {}", truncate(item, MAX_ITEM_CHARS));
                }
                out.push('\n');
            }
        }

        if params.wants("stats") && !extracted.stats.is_empty() {
            out.push_str("## Stats\n");
            for (key, value) in &extracted.stats {
                let _ = writeln!(out, "- {}: {}", key.replace('_', " "), value);
            }
            out.push('\n');
        }

        out.push_str("## Summary\n");
        let _ = writeln!(out, "- Events: {}", extracted.events.len());
        let _ = writeln!(out, "- Lessons: {}", extracted.lessons.len());
        let _ = writeln!(out, "- Tools: {}", extracted.tools.len());
        let _ = writeln!(out, "- Connections: {}", extracted.connections.len());

        out.trim().to_string()
    }
}

impl JobProcessor for MemoryCurator {
    fn kind(&self) -> u16 {
        KIND_JOB_MEMORY_CURATION
    }

    fn name(&self) -> &str {
        "memory-curator"
    }

    fn validate(&self, inputs: &JobInputs) -> std::result::Result<(), ValidationError> {
        if inputs.daily_log().is_none() {
            return Err(ValidationError::missing_input("No daily log input provided"));
        }
        CurationParams::from_inputs(inputs).map(|_| ())
    }

    fn process(&self, inputs: &JobInputs) -> Result<ProcessorOutput> {
        let params = CurationParams::from_inputs(inputs)?;
        let log = inputs
            .daily_log()
            .ok_or_else(|| ValidationError::missing_input("No daily log input provided"))?;

        let extracted = self.extract(log);
        let memory_sections = parse_memory_sections(inputs.memory_file().unwrap_or_default());
        let suggestions = self.suggest(&extracted, &memory_sections, &params);
        let content = self.format(&extracted, &suggestions, &params);

        Ok(ProcessorOutput {
            extraction: json!({
                "extracted": extracted,
                "suggestions": suggestions,
            }),
            content,
        })
    }

    fn status_message(&self) -> &str {
        "Analyzing daily log..."
    }

    fn nip90_params(&self) -> Option<Value> {
        Some(json!({
            "style": {
                "required": false,
                "values": ["concise", "detailed"],
            },
            "max_items": {
                "required": false,
                "default": DEFAULT_MAX_ITEMS,
            },
            "sections": {
                "required": false,
                "values": SECTION_KEYS,
            },
        }))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| crate::error::DvmError::Processing(format!("bad pattern {pattern}: {e}")))
}

fn classify(text: &str, extracted: &mut Extraction) {
    let lower = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(*w));

    if has(&["learned", "insight", "realized"]) {
        extracted.lessons.push(text.to_string());
    }
    if has(&["built", "created", "wrote"]) {
        if has(&[".mjs", "tool", "script"]) {
            extracted.tools.push(text.to_string());
        } else if has(&["guide", "content", ".md"]) {
            extracted.content.push(text.to_string());
        }
    }
    if has(&["blocked", "can't"]) {
        extracted.blockers.push(text.to_string());
    }
    if has(&["decided", "strategy"]) {
        extracted.decisions.push(text.to_string());
    }
}

fn bullet_text(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Split a memory file into `## ` sections. Text before the first heading
/// is ignored.
fn parse_memory_sections(memory: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in memory.lines() {
        if let Some(title) = line.strip_prefix("## ") {
            if let Some((name, body)) = current.take() {
                sections.push((name, body.join("\n").trim().to_string()));
            }
            current = Some((title.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current {
        sections.push((name, body.join("\n").trim().to_string()));
    }

    sections
}

fn push_suggestion(out: &mut Vec<Suggestion>, section: &str, items: Vec<String>, reason: &str) {
    if items.is_empty() {
        return;
    }
    out.push(Suggestion {
        section: section.to_string(),
        items,
        reason: reason.to_string(),
    });
}

fn truncate(item: &str, max_chars: usize) -> String {
    if item.chars().count() > max_chars {
        let head: String = item.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        item.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "# Test Log\n## Session\n- Built a tool\n- Learned something\n- Made a connection";

    fn curator() -> MemoryCurator {
        MemoryCurator::new().unwrap()
    }

    fn daily(log: &str) -> JobInputs {
        JobInputs::default().with_named("daily_log", log)
    }

    // ===== Extraction =====

    #[test]
    fn test_timestamped_lines() {
        let log = "\
- [09:15] Learned that relays drop idle sockets after a minute of silence
[2026-02-05 10:30] Wrote memory-curator.mjs tool
[11:00:05] Decided on a polling strategy
- [12:00] Blocked on relay auth, can't publish
- [13:00] Wrote a setup guide.md";
        let extracted = curator().extract(log);

        assert_eq!(extracted.events.len(), 5);
        assert_eq!(extracted.events[1].time.as_deref(), Some("10:30"));
        assert_eq!(extracted.events[2].time.as_deref(), Some("11:00:05"));
        assert_eq!(extracted.lessons.len(), 1);
        assert_eq!(extracted.tools, vec!["Wrote memory-curator.mjs tool"]);
        assert_eq!(extracted.decisions.len(), 1);
        assert_eq!(extracted.blockers.len(), 1);
        assert_eq!(extracted.content, vec!["Wrote a setup guide.md"]);
    }

    #[test]
    fn test_stats_and_connections_are_not_entries() {
        let log = "\
- Posted 12 notes today
- Earned 210 sats
- **Jeletor** — runs a trust DVM
- 4 tools shipped";
        let extracted = curator().extract(log);

        assert!(extracted.events.is_empty());
        assert_eq!(
            extracted.stats,
            vec![
                ("nostr_notes".to_string(), 12),
                ("sats".to_string(), 210),
                ("tools_count".to_string(), 4),
            ]
        );
        assert_eq!(extracted.connections.len(), 1);
        assert_eq!(extracted.connections[0].name, "Jeletor");
        assert_eq!(extracted.connections[0].description, "runs a trust DVM");
    }

    #[test]
    fn test_key_insight_counted_once() {
        let extracted = curator().extract("- Key insight: learned that small tags beat big content");
        assert_eq!(extracted.lessons.len(), 1);

        let extracted = curator().extract("Key learning: relays are not databases");
        assert_eq!(extracted.lessons, vec!["Key learning: relays are not databases"]);
        assert!(extracted.events.is_empty());
    }

    #[test]
    fn test_memory_sections() {
        let sections = parse_memory_sections("preamble\n## What I Built\n- a.mjs\n\n## Key Connections\n- Bob\n");
        assert_eq!(
            sections,
            vec![
                ("What I Built".to_string(), "- a.mjs".to_string()),
                ("Key Connections".to_string(), "- Bob".to_string()),
            ]
        );
        assert!(parse_memory_sections("").is_empty());
    }

    // ===== Suggestions and output =====

    #[test]
    fn test_sample_log_detailed() {
        let inputs = daily(SAMPLE_LOG).with_param("style", "detailed");
        let output = curator().process(&inputs).unwrap();

        assert!(output.content.starts_with("## Suggested Additions"));
        assert!(output.content.contains("### → What I Built\n*Reason: New tools created*\n\n- Built a tool"));
        assert!(output.content.contains("## Summary\n- Events: 3\n- Lessons: 1\n- Tools: 1\n- Connections: 0"));
        assert_eq!(output.extraction["extracted"]["tools"][0], "Built a tool");
    }

    #[test]
    fn test_concise_has_no_reasons() {
        let output = curator().process(&daily(SAMPLE_LOG)).unwrap();
        assert!(!output.content.contains("*Reason:"));
        assert!(output.content.contains("- Built a tool"));
    }

    #[test]
    fn test_known_tools_and_connections_are_skipped() {
        let log = "\
[10:00] Built memory-curator.mjs tool
[11:00] Built dvm-monitor.mjs script
- **Alice** — builds relays
- **Bob** — writes clients";
        let memory = "## What I Built\n- memory-curator.mjs\n## Key Connections\n- alice";
        let inputs = daily(log).with_named("memory_file", memory);
        let output = curator().process(&inputs).unwrap();

        assert!(output.content.contains("- Built dvm-monitor.mjs script"));
        assert!(!output.content.contains("Built memory-curator.mjs"));
        assert!(output.content.contains("- **Bob** — writes clients"));
        assert!(!output.content.contains("**Alice**"));
    }

    #[test]
    fn test_lessons_filtered_by_length_and_deduplicated() {
        let long = "Learned that every relay must be treated as independently unreliable";
        let log = format!("- {long}\n- {long}\n- Learned a short thing");
        let output = curator().process(&daily(&log)).unwrap();

        assert_eq!(output.content.matches(long).count(), 1);
        assert!(!output.content.contains("short thing\n"));
        assert!(output.content.contains("- Lessons: 3"));
    }

    #[test]
    fn test_max_items_and_truncation() {
        let long_tool = format!("Built {}.mjs tool", "x".repeat(200));
        let log = format!("- {long_tool}\n- Built a.mjs\n- Built b.mjs\n- Built c.mjs");
        let inputs = daily(&log).with_param("max_items", "2");
        let output = curator().process(&inputs).unwrap();

        let truncated = format!("- {}...", long_tool.chars().take(150).collect::<String>());
        assert!(output.content.contains(&truncated));
        assert!(output.content.contains("- Built a.mjs"));
        assert!(!output.content.contains("- Built b.mjs"));
    }

    #[test]
    fn test_sections_param_restricts_output() {
        let log = "- Built a tool\n- 5 notes posted\n- **Carol** — reviews DVMs";
        let inputs = daily(log).with_param("sections", "connections");
        let output = curator().process(&inputs).unwrap();

        assert!(output.content.contains("### → Key Connections"));
        assert!(!output.content.contains("What I Built"));
        assert!(!output.content.contains("## Stats"));
        assert!(output.content.contains("## Summary"));
    }

    #[test]
    fn test_stats_section() {
        let output = curator().process(&daily("Posted 7 notes and zapped 21 sats")).unwrap();
        assert!(output.content.starts_with("## Stats\n- nostr notes: 7\n- sats: 21\n\n## Summary"));
    }

    #[test]
    fn test_content_created_section() {
        let output = curator()
            .process(&daily("[09:00] Wrote the onboarding guide"))
            .unwrap();
        assert!(output.content.contains("### → Content Created\n- Wrote the onboarding guide"));
    }

    // ===== Validation =====

    #[test]
    fn test_missing_daily_log() {
        let err = curator().validate(&JobInputs::default()).unwrap_err();
        assert_eq!(err.code, crate::error::ReasonCode::MissingInput);
        assert_eq!(err.message, "No daily log input provided");
    }

    #[test]
    fn test_bad_params_rejected() {
        let curator = curator();
        for (key, value) in [("style", "verbose"), ("max_items", "0"), ("max_items", "lots"), ("sections", "gossip")] {
            let err = curator.validate(&daily("- entry").with_param(key, value)).unwrap_err();
            assert_eq!(err.code, crate::error::ReasonCode::InvalidInput, "{key}={value}");
        }
    }

    #[test]
    fn test_deterministic() {
        let curator = curator();
        let inputs = daily(SAMPLE_LOG);
        assert_eq!(
            curator.process(&inputs).unwrap().content,
            curator.process(&inputs).unwrap().content
        );
    }
}
