//! Line-item diffing for quotation and invoice edits.
//!
//! The UI sends the full edited item list; the store keeps the original.
//! Rather than rewriting every row (and re-syncing the whole document), the
//! edit commands compute the minimal added / updated / deleted sets and apply
//! only those. Rows are keyed by their line id; an edited row without an id
//! is an addition.

use serde_json::Value;
use std::collections::HashMap;

/// Fields whose change marks a line as updated.
const TRACKED_FIELDS: &[&str] = &["name", "quantity", "unitPrice", "unit_price", "productId", "product_id"];

/// Result of diffing an edited item list against the original.
#[derive(Debug, Default)]
pub struct ItemDiff {
    /// Rows with no id (or an id the original never had).
    pub added: Vec<Value>,
    /// Rows whose tracked fields changed, in their edited form.
    pub updated: Vec<Value>,
    /// Ids present in the original but missing from the edit.
    pub deleted: Vec<String>,
}

impl ItemDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "added": self.added,
            "updated": self.updated,
            "deleted": self.deleted,
        })
    }
}

fn line_id(item: &Value) -> Option<String> {
    item.get("id")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn tracked_field_changed(original: &Value, edited: &Value) -> bool {
    TRACKED_FIELDS.iter().any(|field| {
        let a = original.get(field);
        let b = edited.get(field);
        match (a, b) {
            (None, None) => false,
            // Numeric fields may arrive as int in one list and float in the
            // other; compare as f64 when both sides are numbers.
            (Some(av), Some(bv)) => {
                if let (Some(an), Some(bn)) = (av.as_f64(), bv.as_f64()) {
                    (an - bn).abs() > f64::EPSILON
                } else {
                    av != bv
                }
            }
            _ => true,
        }
    })
}

/// Compute the add/update/delete sets for an item list edit.
pub fn diff_items(original: &[Value], edited: &[Value]) -> ItemDiff {
    let original_by_id: HashMap<String, &Value> = original
        .iter()
        .filter_map(|item| line_id(item).map(|id| (id, item)))
        .collect();

    let mut diff = ItemDiff::default();
    let mut seen_ids: Vec<String> = Vec::new();

    for item in edited {
        match line_id(item) {
            Some(id) => match original_by_id.get(&id) {
                Some(orig) => {
                    seen_ids.push(id);
                    if tracked_field_changed(orig, item) {
                        diff.updated.push(item.clone());
                    }
                }
                // An id the original never had — treat as addition (the UI
                // may pre-assign ids to new rows).
                None => diff.added.push(item.clone()),
            },
            None => diff.added.push(item.clone()),
        }
    }

    for id in original_by_id.keys() {
        if !seen_ids.iter().any(|seen| seen == id) {
            diff.deleted.push(id.clone());
        }
    }
    diff.deleted.sort();

    diff
}

/// Per-product stock deltas implied by an invoice item edit.
///
/// Selling decrements stock, so a positive returned delta means "take this
/// much more from stock" and a negative one means "give it back". Keyed by
/// product id; rows without a product id (free-text lines) carry no stock.
pub fn stock_deltas(original: &[Value], edited: &[Value]) -> HashMap<String, f64> {
    fn accumulate(items: &[Value], sign: f64, acc: &mut HashMap<String, f64>) {
        for item in items {
            let product_id = item
                .get("productId")
                .or_else(|| item.get("product_id"))
                .and_then(Value::as_str)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty());
            if let Some(pid) = product_id {
                let qty = item.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
                *acc.entry(pid.to_string()).or_insert(0.0) += sign * qty;
            }
        }
    }

    let mut deltas = HashMap::new();
    accumulate(edited, 1.0, &mut deltas);
    accumulate(original, -1.0, &mut deltas);
    deltas.retain(|_, delta| delta.abs() > f64::EPSILON);
    deltas
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn original_items() -> Vec<Value> {
        vec![
            serde_json::json!({ "id": "l1", "name": "Cable", "quantity": 2.0, "unitPrice": 5.0 }),
            serde_json::json!({ "id": "l2", "name": "Charger", "quantity": 1.0, "unitPrice": 12.0 }),
            serde_json::json!({ "id": "l3", "name": "Case", "quantity": 3.0, "unitPrice": 4.0 }),
        ]
    }

    #[test]
    fn unchanged_lists_produce_empty_diff() {
        let original = original_items();
        let diff = diff_items(&original, &original);
        assert!(diff.is_empty());
    }

    #[test]
    fn detects_added_updated_deleted() {
        let original = original_items();
        let edited = vec![
            // l1 quantity changed
            serde_json::json!({ "id": "l1", "name": "Cable", "quantity": 5.0, "unitPrice": 5.0 }),
            // l2 untouched
            serde_json::json!({ "id": "l2", "name": "Charger", "quantity": 1.0, "unitPrice": 12.0 }),
            // l3 removed, new row without id added
            serde_json::json!({ "name": "Screen protector", "quantity": 1.0, "unitPrice": 2.0 }),
        ];

        let diff = diff_items(&original, &edited);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0]["name"], "Screen protector");
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0]["id"], "l1");
        assert_eq!(diff.deleted, vec!["l3".to_string()]);
    }

    #[test]
    fn unknown_id_counts_as_addition() {
        let original = original_items();
        let edited = vec![serde_json::json!({
            "id": "fresh-ui-id", "name": "New row", "quantity": 1.0, "unitPrice": 1.0
        })];

        let diff = diff_items(&original, &edited);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.deleted.len(), 3);
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn integer_and_float_quantities_compare_equal() {
        let original = vec![serde_json::json!({ "id": "l1", "name": "Cable", "quantity": 2, "unitPrice": 5 })];
        let edited = vec![serde_json::json!({ "id": "l1", "name": "Cable", "quantity": 2.0, "unitPrice": 5.0 })];
        assert!(diff_items(&original, &edited).is_empty());
    }

    #[test]
    fn price_change_marks_update() {
        let original = original_items();
        let mut edited = original.clone();
        edited[1]["unitPrice"] = serde_json::json!(10.5);

        let diff = diff_items(&original, &edited);
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0]["id"], "l2");
    }

    #[test]
    fn empty_edit_deletes_everything() {
        let original = original_items();
        let diff = diff_items(&original, &[]);
        assert_eq!(diff.deleted.len(), 3);
        assert!(diff.added.is_empty() && diff.updated.is_empty());
    }

    // ------------------------------------------------------------------
    // Stock deltas
    // ------------------------------------------------------------------

    #[test]
    fn stock_delta_for_new_invoice_is_full_quantity() {
        let edited = vec![
            serde_json::json!({ "productId": "p1", "quantity": 3.0 }),
            serde_json::json!({ "productId": "p2", "quantity": 1.0 }),
        ];
        let deltas = stock_deltas(&[], &edited);
        assert_eq!(deltas.get("p1"), Some(&3.0));
        assert_eq!(deltas.get("p2"), Some(&1.0));
    }

    #[test]
    fn stock_delta_tracks_quantity_changes_and_removals() {
        let original = vec![
            serde_json::json!({ "id": "l1", "productId": "p1", "quantity": 3.0 }),
            serde_json::json!({ "id": "l2", "productId": "p2", "quantity": 2.0 }),
        ];
        let edited = vec![
            // p1 raised from 3 to 5 -> +2
            serde_json::json!({ "id": "l1", "productId": "p1", "quantity": 5.0 }),
            // p2 line removed -> -2
        ];
        let deltas = stock_deltas(&original, &edited);
        assert_eq!(deltas.get("p1"), Some(&2.0));
        assert_eq!(deltas.get("p2"), Some(&-2.0));
    }

    #[test]
    fn free_text_lines_carry_no_stock() {
        let edited = vec![serde_json::json!({ "name": "Labor", "quantity": 1.0 })];
        assert!(stock_deltas(&[], &edited).is_empty());
    }

    #[test]
    fn unchanged_quantities_drop_out_of_deltas() {
        let items = vec![serde_json::json!({ "id": "l1", "productId": "p1", "quantity": 4.0 })];
        assert!(stock_deltas(&items, &items).is_empty());
    }
}
