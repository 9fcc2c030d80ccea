//! Shared list-query engine: search, sort, and pagination over JSON records.
//!
//! Every list screen (catalog, maintenance, quotations, legal cases,
//! receipts, invoices, storefront) funnels through these helpers instead of
//! repeating filter/sort/slice logic per command.
//!
//! Semantics:
//! - **Search**: a record matches when every whitespace-separated query word
//!   appears in at least one of the configured fields (case-insensitive).
//! - **Sort**: numeric fields compare as numbers, everything else as
//!   case-insensitive strings; ISO-8601 timestamps therefore sort correctly
//!   as strings. The sort is stable.
//! - **Pagination**: `page` is 1-based and clamped into the valid range,
//!   `per_page` is bounded to keep a single IPC response reasonable.

use serde_json::Value;

/// Bounds for per_page clamping.
const PER_PAGE_DEFAULT: usize = 25;
const PER_PAGE_MAX: usize = 200;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn from_str(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(ref s) if s == "desc" || s == "descending" => SortDir::Desc,
            _ => SortDir::Asc,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

/// Options for a list query, parsed from a command payload.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub search: String,
    pub sort_by: Option<String>,
    pub sort_dir: SortDir,
    pub page: usize,
    pub per_page: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            search: String::new(),
            sort_by: None,
            sort_dir: SortDir::Asc,
            page: 1,
            per_page: PER_PAGE_DEFAULT,
        }
    }
}

impl ListOptions {
    /// Parse options from a loosely-typed payload object. Unknown or missing
    /// keys fall back to defaults; nonsense values are clamped rather than
    /// rejected so a buggy UI can never break listing.
    pub fn from_payload(payload: &Value) -> Self {
        let search = payload
            .get("search")
            .or_else(|| payload.get("query"))
            .or_else(|| payload.get("q"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let sort_by = payload
            .get("sortBy")
            .or_else(|| payload.get("sort_by"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let sort_dir = SortDir::from_str(
            payload
                .get("sortDir")
                .or_else(|| payload.get("sort_dir"))
                .or_else(|| payload.get("direction"))
                .and_then(Value::as_str),
        );
        let page = payload
            .get("page")
            .and_then(Value::as_u64)
            .map(|p| p as usize)
            .unwrap_or(1)
            .max(1);
        let per_page = payload
            .get("perPage")
            .or_else(|| payload.get("per_page"))
            .or_else(|| payload.get("pageSize"))
            .and_then(Value::as_u64)
            .map(|p| p as usize)
            .unwrap_or(PER_PAGE_DEFAULT)
            .clamp(1, PER_PAGE_MAX);

        Self {
            search,
            sort_by,
            sort_dir,
            page,
            per_page,
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Case-insensitive field extraction for matching.
fn field_text(record: &Value, field: &str) -> Option<String> {
    match record.get(field) {
        Some(Value::String(s)) => Some(s.to_lowercase()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// A record matches when **every** query word appears in at least one of the
/// configured fields. An empty query matches everything.
pub fn matches_all_words(record: &Value, query: &str, fields: &[&str]) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }

    query.split_whitespace().all(|word| {
        let word = word.to_lowercase();
        fields.iter().any(|field| {
            field_text(record, field)
                .map(|text| text.contains(&word))
                .unwrap_or(false)
        })
    })
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

/// Compare two JSON values for sorting: numbers numerically, everything else
/// as case-insensitive strings. Null/missing sorts last in ascending order.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Greater,
        (Some(_), None | Some(Value::Null)) => Ordering::Less,
        (Some(av), Some(bv)) => {
            if let (Some(an), Some(bn)) = (av.as_f64(), bv.as_f64()) {
                return an.partial_cmp(&bn).unwrap_or(Ordering::Equal);
            }
            let astr = av.as_str().map(|s| s.to_lowercase());
            let bstr = bv.as_str().map(|s| s.to_lowercase());
            match (astr, bstr) {
                (Some(astr), Some(bstr)) => astr.cmp(&bstr),
                _ => av.to_string().to_lowercase().cmp(&bv.to_string().to_lowercase()),
            }
        }
    }
}

/// Stable sort by the given field and direction.
pub fn sort_records(records: &mut [Value], field: &str, dir: SortDir) {
    records.sort_by(|a, b| {
        let ord = compare_values(a.get(field), b.get(field));
        match dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        }
    });
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Slice one page out of the record list.
///
/// `page` is clamped to `[1, page_count]`; the returned JSON carries enough
/// metadata for the UI pager (total, pageCount, resolved page).
pub fn paginate(records: Vec<Value>, page: usize, per_page: usize) -> Value {
    let per_page = per_page.clamp(1, PER_PAGE_MAX);
    let total = records.len();
    let page_count = total.div_ceil(per_page).max(1);
    let page = page.clamp(1, page_count);

    let start = (page - 1) * per_page;
    let items: Vec<Value> = records.into_iter().skip(start).take(per_page).collect();

    serde_json::json!({
        "items": items,
        "total": total,
        "page": page,
        "perPage": per_page,
        "pageCount": page_count,
    })
}

/// Full pipeline: filter by the query over `search_fields`, sort, paginate.
pub fn apply(records: Vec<Value>, opts: &ListOptions, search_fields: &[&str]) -> Value {
    let mut filtered: Vec<Value> = records
        .into_iter()
        .filter(|r| matches_all_words(r, &opts.search, search_fields))
        .collect();

    if let Some(ref field) = opts.sort_by {
        sort_records(&mut filtered, field, opts.sort_dir);
    }

    paginate(filtered, opts.page, opts.per_page)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<Value> {
        vec![
            serde_json::json!({ "id": "a", "name": "Samsung charger 25W", "category": "chargers", "price": 12.5 }),
            serde_json::json!({ "id": "b", "name": "USB-C cable white", "category": "cables", "price": 3.0 }),
            serde_json::json!({ "id": "c", "name": "Samsung USB-C cable", "category": "cables", "price": 5.0 }),
            serde_json::json!({ "id": "d", "name": "Screen protector", "category": "accessories", "price": 2.0 }),
        ]
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    #[test]
    fn search_requires_all_words() {
        let records = sample_records();
        let fields = &["name", "category"];

        let hits: Vec<&Value> = records
            .iter()
            .filter(|r| matches_all_words(r, "samsung cable", fields))
            .collect();
        // Only "Samsung USB-C cable" carries both words
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["id"], "c");
    }

    #[test]
    fn search_words_may_match_different_fields() {
        let records = sample_records();
        // "samsung" in name, "chargers" in category
        assert!(matches_all_words(
            &records[0],
            "samsung chargers",
            &["name", "category"]
        ));
    }

    #[test]
    fn search_is_case_insensitive_and_empty_matches_all() {
        let records = sample_records();
        assert!(matches_all_words(&records[1], "USB-C WHITE", &["name"]));
        for r in &records {
            assert!(matches_all_words(r, "", &["name"]));
            assert!(matches_all_words(r, "   ", &["name"]));
        }
    }

    #[test]
    fn search_matches_numeric_fields() {
        let records = sample_records();
        assert!(matches_all_words(&records[1], "3", &["name", "price"]));
    }

    // ------------------------------------------------------------------
    // Sort
    // ------------------------------------------------------------------

    #[test]
    fn sort_numeric_and_toggle_direction() {
        let mut records = sample_records();
        sort_records(&mut records, "price", SortDir::Asc);
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["d", "b", "c", "a"]);

        sort_records(&mut records, "price", SortDir::Asc.toggled());
        let ids: Vec<&str> = records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn sort_strings_case_insensitive() {
        let mut records = vec![
            serde_json::json!({ "name": "zebra" }),
            serde_json::json!({ "name": "Apple" }),
            serde_json::json!({ "name": "mango" }),
        ];
        sort_records(&mut records, "name", SortDir::Asc);
        let names: Vec<&str> = records.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Apple", "mango", "zebra"]);
    }

    #[test]
    fn sort_missing_values_last_in_ascending() {
        let mut records = vec![
            serde_json::json!({ "id": 1 }),
            serde_json::json!({ "id": 2, "date": "2026-01-05" }),
            serde_json::json!({ "id": 3, "date": "2025-11-20" }),
        ];
        sort_records(&mut records, "date", SortDir::Asc);
        let ids: Vec<i64> = records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    // ------------------------------------------------------------------
    // Pagination
    // ------------------------------------------------------------------

    #[test]
    fn paginate_slices_and_reports_bounds() {
        let records: Vec<Value> = (1..=10).map(|i| serde_json::json!({ "id": i })).collect();
        let page = paginate(records, 2, 3);
        assert_eq!(page["total"], 10);
        assert_eq!(page["pageCount"], 4);
        assert_eq!(page["page"], 2);
        let ids: Vec<i64> = page["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![4, 5, 6]);
    }

    #[test]
    fn paginate_clamps_page_beyond_end() {
        let records: Vec<Value> = (1..=5).map(|i| serde_json::json!({ "id": i })).collect();
        let page = paginate(records, 99, 2);
        // 3 pages of 2 — page 99 clamps to 3, holding the last record
        assert_eq!(page["page"], 3);
        assert_eq!(page["items"].as_array().unwrap().len(), 1);
        assert_eq!(page["items"][0]["id"], 5);
    }

    #[test]
    fn paginate_empty_list_yields_single_empty_page() {
        let page = paginate(Vec::new(), 1, 25);
        assert_eq!(page["total"], 0);
        assert_eq!(page["pageCount"], 1);
        assert_eq!(page["page"], 1);
        assert!(page["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn per_page_is_bounded() {
        let records: Vec<Value> = (1..=500).map(|i| serde_json::json!({ "id": i })).collect();
        let page = paginate(records, 1, 10_000);
        assert_eq!(page["perPage"], 200);
        assert_eq!(page["items"].as_array().unwrap().len(), 200);
    }

    // ------------------------------------------------------------------
    // Full pipeline
    // ------------------------------------------------------------------

    #[test]
    fn apply_filters_sorts_and_paginates() {
        let opts = ListOptions {
            search: "cable".into(),
            sort_by: Some("price".into()),
            sort_dir: SortDir::Desc,
            page: 1,
            per_page: 1,
        };
        let result = apply(sample_records(), &opts, &["name", "category"]);
        assert_eq!(result["total"], 2);
        assert_eq!(result["pageCount"], 2);
        assert_eq!(result["items"][0]["id"], "c");
    }

    #[test]
    fn options_from_payload_clamp_nonsense() {
        let opts = ListOptions::from_payload(&serde_json::json!({
            "search": "  tv  ",
            "sortBy": "name",
            "sortDir": "DESC",
            "page": 0,
            "perPage": 0
        }));
        assert_eq!(opts.search, "tv");
        assert_eq!(opts.sort_dir, SortDir::Desc);
        assert_eq!(opts.page, 1);
        assert_eq!(opts.per_page, 1);

        let defaults = ListOptions::from_payload(&serde_json::json!({}));
        assert_eq!(defaults.page, 1);
        assert_eq!(defaults.per_page, 25);
        assert!(defaults.sort_by.is_none());
    }
}
