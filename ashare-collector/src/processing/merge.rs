//! Priority merge of same-entity records from several sources.
//!
//! Field by field, the value comes from the highest-priority source that
//! reported one (lower priority number wins). Fields no source reported stay
//! `None`. Merged records carry every contributing source joined by '+'.
//! A record's own source tag wins over the provider name, so data served
//! from the local cache keeps the source that first reported it.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::data::{FinancialMetric, IndustryClassification, ListedCompany, Sourced};

/// Field name → source that supplied it
pub type Provenance = BTreeMap<&'static str, &'static str>;

/// A merged record with per-field provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub record: T,
    pub provenance: Provenance,
}

/// Results sorted by priority; ties keep their input order.
fn by_priority<T>(results: &[Sourced<T>]) -> Vec<&Sourced<T>> {
    let mut ordered: Vec<&Sourced<T>> = results.iter().collect();
    ordered.sort_by_key(|r| r.priority);
    ordered
}

/// Source tag of a record, falling back to the provider that returned it.
fn tag<'a>(own: &'a str, provider: &'a str) -> &'a str {
    if own.is_empty() {
        provider
    } else {
        own
    }
}

/// Join source names in order, skipping repeats.
pub fn join_sources<'a>(sources: impl IntoIterator<Item = &'a str>) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for source in sources {
        if !source.is_empty() && !seen.contains(&source) {
            seen.push(source);
        }
    }
    seen.join("+")
}

/// Pick a field from the first result that has it.
fn pick<T, V>(
    ordered: &[&Sourced<T>],
    field: &'static str,
    provenance: &mut Provenance,
    get: impl Fn(&T) -> Option<V>,
) -> Option<V> {
    ordered.iter().find_map(|r| {
        let value = get(&r.data)?;
        provenance.insert(field, r.source);
        Some(value)
    })
}

// ============================================================================
// Industry
// ============================================================================

pub fn merge_industry(code: &str, results: &[Sourced<IndustryClassification>]) -> Merged<IndustryClassification> {
    let ordered = by_priority(results);
    let mut provenance = Provenance::new();

    let level1 = pick(&ordered, "level1", &mut provenance, |i| i.level1.clone());
    let level2 = pick(&ordered, "level2", &mut provenance, |i| i.level2.clone());
    let level3 = pick(&ordered, "level3", &mut provenance, |i| i.level3.clone());

    let source = join_sources(
        ordered
            .iter()
            .filter(|r| provenance.values().any(|p| *p == r.source))
            .map(|r| tag(&r.data.source, r.source)),
    );

    Merged {
        record: IndustryClassification {
            code: code.to_string(),
            level1,
            level2,
            level3,
            source,
        },
        provenance,
    }
}

// ============================================================================
// Financial Metrics
// ============================================================================

/// One metric per requested cell, each tagged with the source of its value.
pub fn merge_metrics(
    code: &str,
    periods: &[NaiveDate],
    subjects: &[String],
    results: &[Sourced<Vec<FinancialMetric>>],
) -> Vec<FinancialMetric> {
    let ordered = by_priority(results);

    // First non-null value per cell in priority order
    let mut best: HashMap<(NaiveDate, &str), (f64, &str)> = HashMap::new();
    for result in &ordered {
        for metric in &result.data {
            if let Some(value) = metric.value {
                best.entry((metric.period, metric.subject.as_str()))
                    .or_insert((value, tag(&metric.source, result.source)));
            }
        }
    }

    let mut merged = Vec::with_capacity(periods.len() * subjects.len());
    for period in periods {
        for subject in subjects {
            let (value, source) = match best.get(&(*period, subject.as_str())) {
                Some((value, source)) => (Some(*value), *source),
                None => (None, ""),
            };
            merged.push(FinancialMetric::new(code, *period, subject.clone(), value, source));
        }
    }
    merged
}

// ============================================================================
// Stock Lists
// ============================================================================

/// Union of stock lists. Per code the name comes from the highest-priority
/// list containing it and the listing date from the first list that has one.
pub fn merge_stock_lists(lists: &[Sourced<Vec<ListedCompany>>]) -> Vec<Merged<ListedCompany>> {
    let ordered = by_priority(lists);
    let mut merged: BTreeMap<String, Merged<ListedCompany>> = BTreeMap::new();

    for list in ordered {
        for company in &list.data {
            match merged.get_mut(&company.code) {
                None => {
                    let mut provenance = Provenance::new();
                    provenance.insert("name", list.source);
                    if company.list_date.is_some() {
                        provenance.insert("list_date", list.source);
                    }
                    let record = ListedCompany {
                        source: tag(&company.source, list.source).to_string(),
                        ..company.clone()
                    };
                    merged.insert(company.code.clone(), Merged { record, provenance });
                }
                Some(existing) => {
                    if existing.record.list_date.is_none() && company.list_date.is_some() {
                        existing.record.list_date = company.list_date;
                        existing.provenance.insert("list_date", list.source);
                        existing.record.source =
                            join_sources([existing.record.source.as_str(), tag(&company.source, list.source)]);
                    }
                }
            }
        }
    }

    merged.into_values().collect()
}
