//! Offline rule-based backend.
//!
//! Understands a small imperative English vocabulary ("open gedit then type
//! \"hello\"", "delete the file report.txt in /tmp/sandbox"). Anything it does
//! not recognise is rejected; file names without a directory are ambiguous.

use super::{ActionDraft, InferenceBackend, PlanDraft};
use async_trait::async_trait;
use deskpilot_common::{ActionKind, ConversationContext, InterpretationError};
use regex::{Captures, Regex, RegexBuilder};
use std::path::Path;
use std::time::Duration;

type Build = fn(&Captures) -> Result<ActionDraft, InterpretationError>;

struct Rule {
    verb: &'static str,
    pattern: Regex,
    build: Build,
}

const ARG: &str = r#"(?:"[^"]+"|\S+)"#;

const DEFAULT_SCROLL: i64 = 3;

pub struct RuleBackend {
    rules: Vec<Rule>,
    best_effort: Regex,
    repeat: Regex,
}

impl RuleBackend {
    pub fn new() -> Result<Self, regex::Error> {
        let defs: [(&'static str, String, Build); 14] = [
            (
                "move",
                r"move\s+(?:the\s+)?(?:mouse|cursor|pointer)\s+to\s+\(?(?P<x>-?\d+)\s*[,\s]\s*(?P<y>-?\d+)\)?".into(),
                mouse_move,
            ),
            (
                "click",
                r"(?:(?P<mult>double|triple)[\s-]+)?(?:(?P<button>left|right|middle)[\s-]+)?click(?:\s+at\s+\(?(?P<x>-?\d+)\s*[,\s]\s*(?P<y>-?\d+)\)?)?".into(),
                mouse_click,
            ),
            (
                "scroll",
                r"scroll\s+(?P<dir>up|down|left|right)(?:\s+(?P<n>\d+))?(?:\s+(?:times|lines|notches))?".into(),
                scroll,
            ),
            (
                "press",
                r"(?:press|hit)\s+(?:the\s+)?(?P<key>\S+)(?:\s+key)?".into(),
                key_press,
            ),
            (
                "type",
                r#"type\s+(?P<secret>(?:the\s+)?secret\s+)?(?P<text>"[^"]*"|.+)"#.into(),
                type_text,
            ),
            (
                "open",
                format!(
                    r#"(?:open|launch|start|run)\s+(?:the\s+)?(?:app\s+|application\s+)?(?P<name>{ARG})(?:\s+with\s+(?:args\s+|arguments\s+)?(?P<args>"[^"]*"))?"#
                ),
                open_app,
            ),
            (
                "close",
                format!(
                    r"(?P<force>force\s+)?(?P<verb>close|quit|exit|kill)\s+(?:the\s+)?(?:app\s+|application\s+)?(?P<name>{ARG})"
                ),
                close_app,
            ),
            (
                "switch",
                format!(
                    r"(?:switch\s+to|focus(?:\s+on)?|go\s+to)\s+(?:the\s+)?(?:app\s+|application\s+)?(?P<name>{ARG})"
                ),
                switch_app,
            ),
            (
                "create",
                format!(
                    r#"(?:create|make|touch)\s+(?:an?\s+|the\s+)?(?:new\s+)?(?:empty\s+)?(?:file\s+)?(?:(?:called|named)\s+)?(?P<name>{ARG})(?:\s+in\s+(?:the\s+)?(?:directory\s+|folder\s+)?(?P<dir>{ARG}))?(?:\s+(?:with|containing)\s+(?:content\s+|text\s+)?(?P<content>"[^"]*"))?"#
                ),
                create_file,
            ),
            (
                "read",
                format!(
                    r"(?:read|cat|print)\s+(?:the\s+)?(?:file\s+)?(?P<name>{ARG})(?:\s+in\s+(?:the\s+)?(?:directory\s+|folder\s+)?(?P<dir>{ARG}))?"
                ),
                read_file,
            ),
            (
                "write",
                format!(
                    r#"(?P<verb>write|append)\s+(?P<content>"[^"]*")\s+to\s+(?:the\s+)?(?:file\s+)?(?P<name>{ARG})(?:\s+in\s+(?:the\s+)?(?:directory\s+|folder\s+)?(?P<dir>{ARG}))?"#
                ),
                write_file,
            ),
            (
                "delete",
                format!(
                    r"(?:delete|remove|rm)\s+(?:the\s+)?(?:file\s+)?(?P<name>{ARG})(?:\s+(?:in|from)\s+(?:the\s+)?(?:directory\s+|folder\s+)?(?P<dir>{ARG}))?"
                ),
                delete_file,
            ),
            (
                "move",
                format!(
                    r"(?:move|rename|mv)\s+(?:the\s+)?(?:file\s+)?(?P<from>{ARG})\s+to\s+(?P<to>{ARG})"
                ),
                move_file,
            ),
            (
                "list",
                format!(
                    r"(?:list|ls)\s+(?:the\s+)?(?:files\s+|contents\s+)?(?:(?:in|of)\s+)?(?:the\s+)?(?:directory\s+|folder\s+)?(?P<dir>{ARG})(?:\s+matching\s+(?P<pattern>{ARG}))?"
                ),
                list_directory,
            ),
        ];

        let rules = defs
            .into_iter()
            .map(|(verb, pattern, build)| {
                Ok(Rule {
                    verb,
                    pattern: anchored(&pattern)?,
                    build,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            rules,
            best_effort: RegexBuilder::new(r",?\s*\b(?:and\s+)?(?:keep\s+going|continue\s+on\s+errors?|best[\s-]effort)\b")
                .case_insensitive(true)
                .build()?,
            repeat: anchored(r"(?:do\s+(?:it|that)\s+again|again|repeat(?:\s+that)?)")?,
        })
    }

    fn translate_clause(&self, clause: &str) -> Result<ActionDraft, InterpretationError> {
        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(clause) {
                tracing::debug!(verb = rule.verb, clause, "rule matched");
                return (rule.build)(&caps);
            }
        }
        Err(self.unsupported(clause))
    }

    fn unsupported(&self, clause: &str) -> InterpretationError {
        let first = clause
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase();
        let closest = self
            .rules
            .iter()
            .map(|r| (r.verb, strsim::jaro_winkler(&first, r.verb)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match closest {
            Some((verb, score)) if score >= 0.8 && verb != first => {
                InterpretationError::UnsupportedIntent(format!(
                    "'{}' (did you mean '{}'?)",
                    clause, verb
                ))
            }
            _ => InterpretationError::UnsupportedIntent(format!("'{}'", clause)),
        }
    }
}

fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!("^(?:{})$", pattern))
        .case_insensitive(true)
        .build()
}

#[async_trait]
impl InferenceBackend for RuleBackend {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn translate(
        &self,
        text: &str,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<PlanDraft, InterpretationError> {
        let trimmed = text.trim().trim_end_matches(['.', '!']);
        if self.repeat.is_match(trimmed) {
            let previous = context
                .turns()
                .last()
                .ok_or_else(|| InterpretationError::Ambiguous("nothing to repeat".into()))?;
            if self.repeat.is_match(previous.text.trim()) {
                return Err(InterpretationError::Ambiguous("nothing to repeat".into()));
            }
            tracing::debug!(previous = %previous.text, "repeating previous command");
            return self.translate(&previous.text, context, timeout).await;
        }

        let best_effort = self.best_effort.is_match(trimmed);
        let stripped = self.best_effort.replace_all(trimmed, "");

        let actions = split_clauses(&stripped)
            .iter()
            .map(|clause| self.translate_clause(clause))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PlanDraft {
            actions,
            confidence: 1.0,
            best_effort,
        })
    }
}

/// Splits on `;` and the word `then`, outside double quotes.
fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in text.chars() {
        if ch == '"' {
            in_quote = !in_quote;
        }
        if !in_quote && ch == ';' {
            push_clause(&mut clauses, &current);
            current.clear();
            continue;
        }
        if !in_quote && ch.is_whitespace() && ends_with_word(&current, "then") {
            current.truncate(current.len() - "then".len());
            push_clause(&mut clauses, &current);
            current.clear();
            continue;
        }
        current.push(ch);
    }
    push_clause(&mut clauses, &current);
    clauses
}

fn ends_with_word(s: &str, word: &str) -> bool {
    if s.len() < word.len() || !s.is_char_boundary(s.len() - word.len()) {
        return false;
    }
    let (head, tail) = s.split_at(s.len() - word.len());
    tail.eq_ignore_ascii_case(word)
        && head
            .chars()
            .last()
            .is_none_or(|c| c.is_whitespace() || c == ',')
}

fn push_clause(clauses: &mut Vec<String>, raw: &str) {
    let mut clause = raw.trim().trim_end_matches([',', '.', '!']).trim();
    if ends_with_word(clause, "and") {
        clause = clause[..clause.len() - "and".len()].trim_end_matches([' ', ',']);
    }
    if let Some(rest) = clause.get(..4)
        && rest.eq_ignore_ascii_case("and ")
    {
        clause = clause[4..].trim_start();
    }
    if !clause.is_empty() {
        clauses.push(clause.to_string());
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn group<'a>(caps: &'a Captures, name: &str) -> Option<&'a str> {
    caps.name(name).map(|m| unquote(m.as_str()))
}

fn number(caps: &Captures, name: &str) -> Result<Option<i64>, InterpretationError> {
    caps.name(name)
        .map(|m| {
            m.as_str()
                .parse::<i64>()
                .map_err(|_| InterpretationError::Ambiguous(format!("'{}' is not a usable number", m.as_str())))
        })
        .transpose()
}

/// Absolute path for a file reference, or `Ambiguous` when the directory
/// cannot be known.
fn file_ref(caps: &Captures, name: &str) -> Result<String, InterpretationError> {
    let file = group(caps, name).unwrap_or_default();
    if Path::new(file).is_absolute() {
        return Ok(file.to_string());
    }
    match group(caps, "dir") {
        Some(dir) if Path::new(dir).is_absolute() => {
            Ok(Path::new(dir).join(file).to_string_lossy().into_owned())
        }
        Some(dir) => Err(InterpretationError::Ambiguous(format!(
            "'{}' is not an absolute directory",
            dir
        ))),
        None => Err(InterpretationError::Ambiguous(format!(
            "which directory is '{}' in?",
            file
        ))),
    }
}

fn mouse_move(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    Ok(ActionDraft::new(ActionKind::MouseMove)
        .param("x", number(caps, "x")?.unwrap_or_default())
        .param("y", number(caps, "y")?.unwrap_or_default()))
}

fn mouse_click(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let mut draft = ActionDraft::new(ActionKind::MouseClick);
    if let Some(button) = group(caps, "button") {
        draft = draft.param("button", button.to_lowercase());
    }
    match group(caps, "mult").map(str::to_lowercase).as_deref() {
        Some("double") => draft = draft.param("count", 2),
        Some("triple") => draft = draft.param("count", 3),
        _ => {}
    }
    if let (Some(x), Some(y)) = (number(caps, "x")?, number(caps, "y")?) {
        draft = draft.param("x", x).param("y", y);
    }
    Ok(draft)
}

fn scroll(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let amount = number(caps, "n")?.unwrap_or(DEFAULT_SCROLL);
    let direction = group(caps, "dir").unwrap_or("down").to_lowercase();
    let draft = ActionDraft::new(ActionKind::Scroll);
    Ok(match direction.as_str() {
        "up" => draft.param("dy", -amount),
        "left" => draft.param("dy", 0).param("dx", -amount),
        "right" => draft.param("dy", 0).param("dx", amount),
        _ => draft.param("dy", amount),
    })
}

fn key_press(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    Ok(ActionDraft::new(ActionKind::KeyPress).param("key", group(caps, "key").unwrap_or_default()))
}

fn type_text(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let mut draft =
        ActionDraft::new(ActionKind::TypeText).param("text", group(caps, "text").unwrap_or_default());
    if caps.name("secret").is_some() {
        draft = draft.param("secret", true);
    }
    Ok(draft)
}

fn open_app(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let mut draft =
        ActionDraft::new(ActionKind::OpenApp).param("name", group(caps, "name").unwrap_or_default());
    if let Some(args) = group(caps, "args") {
        draft = draft.param("args", args);
    }
    Ok(draft)
}

fn close_app(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let forced = caps.name("force").is_some()
        || group(caps, "verb").is_some_and(|v| v.eq_ignore_ascii_case("kill"));
    let mut draft =
        ActionDraft::new(ActionKind::CloseApp).param("name", group(caps, "name").unwrap_or_default());
    if forced {
        draft = draft.param("force", true);
    }
    Ok(draft)
}

fn switch_app(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    Ok(ActionDraft::new(ActionKind::SwitchApp).param("name", group(caps, "name").unwrap_or_default()))
}

fn create_file(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let mut draft = ActionDraft::new(ActionKind::CreateFile).param("path", file_ref(caps, "name")?);
    if let Some(content) = group(caps, "content") {
        draft = draft.param("content", content);
    }
    Ok(draft)
}

fn read_file(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    Ok(ActionDraft::new(ActionKind::ReadFile).param("path", file_ref(caps, "name")?))
}

fn write_file(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let append = group(caps, "verb").is_some_and(|v| v.eq_ignore_ascii_case("append"));
    let mut draft = ActionDraft::new(ActionKind::WriteFile)
        .param("path", file_ref(caps, "name")?)
        .param("content", group(caps, "content").unwrap_or_default());
    if append {
        draft = draft.param("append", true);
    }
    Ok(draft)
}

fn delete_file(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    Ok(ActionDraft::new(ActionKind::DeleteFile).param("path", file_ref(caps, "name")?))
}

fn move_file(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let from = group(caps, "from").unwrap_or_default();
    let to = group(caps, "to").unwrap_or_default();
    let from_path = Path::new(from);
    if !from_path.is_absolute() {
        return Err(InterpretationError::Ambiguous(format!(
            "which directory is '{}' in?",
            from
        )));
    }
    // A bare destination name renames within the source directory.
    let to = if Path::new(to).is_absolute() {
        to.to_string()
    } else if !to.contains('/')
        && let Some(parent) = from_path.parent()
    {
        parent.join(to).to_string_lossy().into_owned()
    } else {
        return Err(InterpretationError::Ambiguous(format!(
            "'{}' is not an absolute destination",
            to
        )));
    };
    Ok(ActionDraft::new(ActionKind::MoveFile)
        .param("from", from)
        .param("to", to))
}

fn list_directory(caps: &Captures) -> Result<ActionDraft, InterpretationError> {
    let dir = group(caps, "dir").unwrap_or_default();
    if !Path::new(dir).is_absolute() {
        return Err(InterpretationError::Ambiguous(format!(
            "'{}' is not an absolute directory",
            dir
        )));
    }
    let mut draft = ActionDraft::new(ActionKind::ListDirectory).param("path", dir);
    if let Some(pattern) = group(caps, "pattern") {
        draft = draft.param("pattern", pattern);
    }
    Ok(draft)
}
