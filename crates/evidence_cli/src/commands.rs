//! Subcommand implementations. Each returns the JSON printed on stdout.

use color_eyre::eyre::{Result, WrapErr, bail};
use console::style;
use evidence_chain::{ChainOptions, PropagationRule};
use evidence_core::{
    ContentHash, EntryId, EntryKind, EvidenceDraft, ProvenanceSource, Timestamp, canonical_json,
    content_addressable_id,
};
use evidence_replay::{PayloadEcho, ReplayEngine, ReplayOptions, ReplaySession};
use evidence_storage::{EvidenceQuery, EvidenceStore, OrderDirection, OrderField};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use serde_json::{Value, json};
use std::io::Read;
use std::path::Path;

/// What a command printed and whether it succeeded
#[derive(Debug)]
pub struct Outcome {
    pub body: Value,
    pub ok: bool,
}

impl Outcome {
    fn ok(body: Value) -> Self {
        Self { body, ok: true }
    }
}

/// A draft file holds one draft or an array of them
#[derive(Deserialize)]
#[serde(untagged)]
enum DraftInput {
    One(Box<EvidenceDraft>),
    Many(Vec<EvidenceDraft>),
}

/// Read JSON from a file, or from stdin when the path is `-`
pub fn read_json(path: &Path) -> Result<Value> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .wrap_err("reading stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?
    };
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}

pub fn append(store: &EvidenceStore, file: &Path, content_addressed: bool) -> Result<Outcome> {
    let input: DraftInput =
        serde_json::from_value(read_json(file)?).wrap_err("input is not an evidence draft")?;

    let entries = match input {
        DraftInput::One(draft) if content_addressed => {
            vec![store.append_content_addressed(*draft)?]
        }
        DraftInput::One(draft) => vec![store.append(*draft)?],
        DraftInput::Many(drafts) if content_addressed => {
            store.append_batch_content_addressed(drafts)?
        }
        DraftInput::Many(drafts) => store.append_batch(drafts)?,
    };

    let warnings = store.take_attribution_warnings();
    Ok(Outcome::ok(json!({
        "appended": entries,
        "attribution_warnings": warnings,
    })))
}

pub fn get(store: &EvidenceStore, id: &str) -> Result<Outcome> {
    let id = EntryId::parse(id)?;
    match store.get(&id)? {
        Some(entry) => Ok(Outcome::ok(serde_json::to_value(entry)?)),
        None => bail!("no entry with id {id}"),
    }
}

/// Filters accepted by `query`
#[derive(Debug, Default)]
pub struct QueryArgs {
    pub kinds: Vec<EntryKind>,
    pub session: Option<String>,
    pub source: Option<ProvenanceSource>,
    pub text: Option<String>,
    pub since: Option<Timestamp>,
    pub until: Option<Timestamp>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub by_confidence: bool,
    pub desc: bool,
}

impl QueryArgs {
    fn to_query(&self) -> EvidenceQuery {
        let mut query = EvidenceQuery::new().kinds(self.kinds.iter().copied());
        query.session_id = self.session.clone();
        query.source = self.source;
        query.text = self.text.clone();
        query.since = self.since;
        query.until = self.until;
        query.limit = self.limit;
        query.offset = self.offset;
        let field = if self.by_confidence {
            OrderField::Confidence
        } else {
            OrderField::Timestamp
        };
        let direction = if self.desc {
            OrderDirection::Desc
        } else {
            OrderDirection::Asc
        };
        query.order_by(field, direction)
    }
}

pub fn query(store: &EvidenceStore, args: &QueryArgs) -> Result<Outcome> {
    let query = args.to_query();
    let entries = store.query(&query)?;
    let total = store.count(&query)?;
    Ok(Outcome::ok(json!({
        "total": total,
        "returned": entries.len(),
        "entries": entries,
    })))
}

pub fn chain(store: &EvidenceStore, id: &str, rule: PropagationRule) -> Result<Outcome> {
    let root = EntryId::parse(id)?;
    let chain = store.get_chain(&root, &ChainOptions::new().with_rule(rule))?;
    let penalties = chain.penalties();
    Ok(Outcome::ok(json!({
        "root": chain.root.id,
        "rule": rule.as_str(),
        "order": chain.ids(),
        "chain_confidence": chain.chain_confidence,
        "confidence_scalar": chain.chain_confidence.scalar(),
        "contradictions": chain.contradictions.iter().map(|c| &c.id).collect::<Vec<_>>(),
        "penalties": penalties,
        "cycle_members": chain.cycle_members,
        "missing": chain.missing,
        "evidence": chain.evidence,
    })))
}

pub fn session(store: &EvidenceStore, id: &str, verify: bool) -> Result<Outcome> {
    let session = ReplaySession::from_session_id(store, id)?;
    if session.is_empty() {
        bail!("session {id} has no entries");
    }
    let kinds: serde_json::Map<String, Value> = session
        .kind_counts()
        .into_iter()
        .map(|(kind, count)| (kind.as_str().to_string(), json!(count)))
        .collect();
    let span = session
        .time_span()
        .map(|(first, last)| json!({"first": first, "last": last}));

    let mut body = json!({
        "session_id": session.session_id(),
        "entries": session.len(),
        "kinds": kinds,
        "time_span": span,
        "ids": session.iter().map(|e| &e.id).collect::<Vec<_>>(),
    });
    let mut ok = true;
    if verify {
        let report = session.verify_integrity();
        ok = report.is_clean();
        body["integrity"] = serde_json::to_value(&report)?;
        body["integrity"]["clean"] = json!(ok);
    }
    Ok(Outcome { body, ok })
}

pub fn sessions(store: &EvidenceStore) -> Result<Outcome> {
    Ok(Outcome::ok(json!({ "sessions": store.session_ids()? })))
}

/// Canonical hash of a JSON document. Drafts also get their
/// content-addressable id.
pub fn hash(file: &Path) -> Result<Outcome> {
    let value = read_json(file)?;
    let canonical = canonical_json(&value)?;
    let hash = ContentHash::compute(canonical.as_bytes());

    let content_id = serde_json::from_value::<EvidenceDraft>(value)
        .ok()
        .map(|draft| content_addressable_id(&draft))
        .transpose()?;

    Ok(Outcome::ok(json!({
        "hash": hash.to_hex(),
        "canonical": canonical,
        "content_id": content_id,
    })))
}

/// Options accepted by `replay`
#[derive(Debug, Default)]
pub struct ReplayArgs {
    pub stop_on_mismatch: bool,
    pub record: bool,
    pub new_session: Option<String>,
    pub no_verify: bool,
    pub progress: bool,
}

/// Replay a session with the payload-echo executor
pub fn replay(store: &EvidenceStore, session_id: &str, args: &ReplayArgs) -> Result<Outcome> {
    let session = ReplaySession::from_session_id(store, session_id)?;
    if session.is_empty() {
        bail!("session {session_id} has no entries");
    }

    let mut options = ReplayOptions::new()
        .verify_hashes(!args.no_verify)
        .stop_on_mismatch(args.stop_on_mismatch)
        .record_new_evidence(args.record);
    if let Some(name) = &args.new_session {
        options = options.new_session_id(name.clone());
    }

    let bar = if args.progress {
        let bar = ProgressBar::new(u64::try_from(session.len()).unwrap_or(u64::MAX));
        bar.set_style(
            ProgressStyle::with_template("{spinner} replay [{bar:30}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let result = {
        let mut mismatches = 0u64;
        let mut engine = ReplayEngine::new(options)
            .with_store(store)
            .on_progress(|progress| {
                if !progress.matched {
                    mismatches += 1;
                    bar.set_message(format!("{mismatches} unmatched"));
                }
                bar.inc(1);
            });
        engine.replay(&session, &mut PayloadEcho)?
    };
    bar.finish_and_clear();

    let line = format!(
        "replay {}: {} matched, {} mismatched, {} unverifiable, {} errors",
        session_id, result.matched, result.mismatches, result.unverifiable, result.errors
    );
    if result.success {
        eprintln!("{}", style(line).green());
    } else {
        eprintln!("{}", style(line).red().bold());
    }

    Ok(Outcome {
        ok: result.success,
        body: serde_json::to_value(&result)?,
    })
}
