//! Budget arithmetic.
//!
//! `spent = Σ(estimated_cost × planned_count)` over every event and
//! `remaining = total_budget − spent`. PDF totals are reported separately
//! and never count against the budget.

use serde::Serialize;

use crate::model::{Document, Event};

/// Cost an event contributes to `spent`.
pub fn event_cost(event: &Event) -> f64 {
    event.estimated_cost * f64::from(event.planned_count)
}

pub fn spent(doc: &Document) -> f64 {
    doc.events.iter().map(event_cost).sum()
}

pub fn remaining(doc: &Document) -> f64 {
    doc.total_budget - spent(doc)
}

/// Sum of line-item totals for one event.
pub fn line_items_total(event: &Event) -> f64 {
    event.items.iter().map(|it| it.total()).sum()
}

/// Sum of display totals across the PDF wall.
pub fn pdf_wall_total(doc: &Document) -> f64 {
    doc.pdf_wall.docs.iter().map(|d| d.display_total()).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub total_budget: f64,
    pub spent: f64,
    pub remaining: f64,
    pub card_balance: f64,
    pub pdf_wall_total: f64,
    pub event_count: usize,
}

pub fn summarize(doc: &Document) -> BudgetSummary {
    let spent = spent(doc);
    BudgetSummary {
        total_budget: doc.total_budget,
        spent,
        remaining: doc.total_budget - spent,
        card_balance: doc.walmart_card_balance,
        pdf_wall_total: pdf_wall_total(doc),
        event_count: doc.events.len(),
    }
}

/// US-dollar formatting with thousands separators: `-$1,234.50`.
pub fn format_money(amount: f64) -> String {
    let amount = if amount.is_finite() { amount } else { 0.0 };
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, ch) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}
