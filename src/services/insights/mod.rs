//! Derived-insight passes over fetched row sets, one module per analysis,
//! plus the synthesis that turns them into prioritized recommendations.

pub mod attribution;
pub mod cannibalization;
pub mod opportunities;
pub mod queries;

use self::cannibalization::CannibalizedQuery;
use self::opportunities::OpportunityItem;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub category: &'static str,
    pub summary: String,
    /// Up to the first three affected keys, for quick orientation.
    pub examples: Vec<String>,
}

fn examples<T>(items: &[T], key: impl Fn(&T) -> String) -> Vec<String> {
    items.iter().take(3).map(key).collect()
}

/// Fold the three independent opportunity analyses into a priority-sorted
/// recommendation list. Empty analyses contribute nothing.
pub fn synthesize_recommendations(
    fruit: &[OpportunityItem],
    cannibalized: &[CannibalizedQuery],
    wins: &[OpportunityItem],
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if !fruit.is_empty() {
        let potential: u64 = fruit.iter().map(|item| item.potential_clicks).sum();
        recommendations.push(Recommendation {
            priority: Priority::High,
            category: "low_hanging_fruit",
            summary: format!(
                "{} queries rank in positions 5-20 with roughly {} additional clicks available",
                fruit.len(),
                potential
            ),
            examples: examples(fruit, |item| item.key.clone()),
        });
    }

    if !cannibalized.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::Medium,
            category: "cannibalization",
            summary: format!(
                "{} queries split impressions across competing pages; consolidate or differentiate them",
                cannibalized.len()
            ),
            examples: examples(cannibalized, |issue| issue.query.clone()),
        });
    }

    if !wins.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::Low,
            category: "quick_wins",
            summary: format!(
                "{} pages sit in positions 11-20 where on-page fixes often move rankings",
                wins.len()
            ),
            examples: examples(wins, |item| item.key.clone()),
        });
    }

    recommendations.sort_by_key(|rec| rec.priority);
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::row;

    #[test]
    fn empty_analyses_yield_no_recommendations() {
        assert!(synthesize_recommendations(&[], &[], &[]).is_empty());
    }

    #[test]
    fn recommendations_come_back_priority_sorted() {
        let rows = vec![row(&["q"], 10, 2_000, 12.0)];
        let fruit = opportunities::low_hanging_fruit(&rows, 100);
        let wins = opportunities::quick_wins(&rows, 100);
        let cannibal_rows = vec![
            row(&["q", "https://example.com/a"], 10, 1_000, 5.0),
            row(&["q", "https://example.com/b"], 10, 1_000, 6.0),
        ];
        let cannibalized = cannibalization::detect_cannibalization(&cannibal_rows, 500);

        let recs = synthesize_recommendations(&fruit, &cannibalized, &wins);
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[0].category, "low_hanging_fruit");
        assert_eq!(recs[1].priority, Priority::Medium);
        assert_eq!(recs[2].priority, Priority::Low);
        assert_eq!(recs[0].examples, vec!["q".to_string()]);
    }
}
