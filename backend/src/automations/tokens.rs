// Token Resolver - replaces {namespace.field} placeholders in step templates
//
// Resolution is total: every token-shaped placeholder is replaced, unknown or
// empty ones with "". Resolved values are never re-scanned.

use chrono::NaiveDate;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use super::context::{ExecutionContext, LineItem};

type TokenFn = fn(&ExecutionContext, &TokenResolver) -> String;

/// Every supported spelling, namespaced first, followed by legacy aliases.
/// Aliases share the resolver function of their namespaced token.
const TOKENS: &[(&[&str], TokenFn)] = &[
    (&["lead.name", "customer_name"], lead_name),
    (&["lead.first_name", "first_name"], lead_first_name),
    (&["lead.email", "customer_email"], lead_email),
    (&["lead.phone", "customer_phone"], lead_phone),
    (&["lead.address", "address"], lead_address),
    (&["lead.service"], lead_service),
    (&["lead.price", "price", "quote_amount"], lead_price),
    (&["lead.stage"], lead_stage),
    (&["estimate.number", "estimate_number"], estimate_number),
    (&["estimate.total"], estimate_total),
    (&["estimate.valid_until"], estimate_valid_until),
    (&["estimate.line_items"], estimate_line_items),
    (&["estimate.link", "estimate_link"], estimate_link),
    (&["work_order.number"], work_order_number),
    (&["work_order.scheduled_date"], work_order_scheduled_date),
    (&["work_order.address"], work_order_address),
    (&["work_order.total"], work_order_total),
    (&["invoice.number", "invoice_number"], invoice_number),
    (&["invoice.amount_due", "amount_due"], invoice_amount_due),
    (&["invoice.due_date"], invoice_due_date),
    (&["invoice.pay_button", "payment_link"], invoice_pay_button),
    (&["business.name", "business_name"], business_name),
    (&["business.phone"], business_phone),
    (&["business.email"], business_email),
];

static TOKEN_TABLE: LazyLock<HashMap<&'static str, TokenFn>> = LazyLock::new(|| {
    TOKENS
        .iter()
        .flat_map(|(spellings, resolve)| spellings.iter().map(move |s| (*s, *resolve)))
        .collect()
});

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:[. ][A-Za-z_][A-Za-z0-9_]*)*)\}")
        .expect("token pattern is a valid regex")
});

const TABLE_DESCRIPTION_WIDTH: usize = 28;
const TABLE_QTY_WIDTH: usize = 6;
const TABLE_AMOUNT_WIDTH: usize = 12;

#[derive(Debug, Clone)]
pub struct TokenResolver {
    base_url: String,
}

impl TokenResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn resolve(&self, template: &str, ctx: &ExecutionContext) -> String {
        TOKEN_PATTERN
            .replace_all(template, |caps: &Captures| {
                let token = &caps[1];
                match TOKEN_TABLE.get(token) {
                    Some(resolve) => resolve(ctx, self),
                    None => {
                        debug!("Unknown template token {{{}}} resolved to empty string", token);
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    pub fn resolve_opt(&self, template: Option<&str>, ctx: &ExecutionContext) -> Option<String> {
        template.map(|t| self.resolve(t, ctx))
    }

    /// All token spellings the resolver knows about.
    pub fn known_tokens() -> impl Iterator<Item = &'static str> {
        TOKENS.iter().flat_map(|(spellings, _)| spellings.iter().copied())
    }
}

/// Render integer cents as `$X.YY`.
pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn text(value: Option<&str>) -> String {
    value.map(str::to_string).unwrap_or_default()
}

fn money(value: Option<i64>) -> String {
    value.map(format_money).unwrap_or_default()
}

fn date(value: Option<NaiveDate>) -> String {
    value.map(format_date).unwrap_or_default()
}

/// Fixed-width plain-text table with a computed total row.
pub fn render_line_items(items: &[LineItem]) -> String {
    if items.is_empty() {
        return String::new();
    }

    let width = TABLE_DESCRIPTION_WIDTH + TABLE_QTY_WIDTH + TABLE_AMOUNT_WIDTH;
    let rule = "-".repeat(width);
    let mut lines = vec![
        format!(
            "{:<dw$}{:>qw$}{:>aw$}",
            "Item",
            "Qty",
            "Amount",
            dw = TABLE_DESCRIPTION_WIDTH,
            qw = TABLE_QTY_WIDTH,
            aw = TABLE_AMOUNT_WIDTH
        ),
        rule.clone(),
    ];

    let mut total: i64 = 0;
    for item in items {
        let amount = item.amount_cents();
        total = total.saturating_add(amount);
        let description: String = item
            .description
            .chars()
            .take(TABLE_DESCRIPTION_WIDTH - 1)
            .collect();
        lines.push(format!(
            "{:<dw$}{:>qw$}{:>aw$}",
            description,
            item.quantity,
            format_money(amount),
            dw = TABLE_DESCRIPTION_WIDTH,
            qw = TABLE_QTY_WIDTH,
            aw = TABLE_AMOUNT_WIDTH
        ));
    }

    lines.push(rule);
    lines.push(format!(
        "{:<dw$}{:>aw$}",
        "Total",
        format_money(total),
        dw = TABLE_DESCRIPTION_WIDTH + TABLE_QTY_WIDTH,
        aw = TABLE_AMOUNT_WIDTH
    ));

    lines.join("\n")
}

// ===== Lead tokens =====

fn lead_name(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.customer_name())
}

fn lead_first_name(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    ctx.customer_name()
        .and_then(|name| name.split_whitespace().next())
        .map(str::to_string)
        .unwrap_or_default()
}

fn lead_email(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.recipient_email())
}

fn lead_phone(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.recipient_phone())
}

fn lead_address(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.customer_address())
}

fn lead_service(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.lead().and_then(|l| l.service_type.as_deref()))
}

fn lead_price(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    money(ctx.lead().and_then(|l| l.calculated_price))
}

fn lead_stage(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.lead().and_then(|l| l.stage.as_deref()))
}

// ===== Estimate tokens =====

fn estimate_number(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.estimate().and_then(|e| e.estimate_number.as_deref()))
}

fn estimate_total(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    let Some(estimate) = ctx.estimate() else {
        return String::new();
    };
    match estimate.total_cents {
        Some(total) => format_money(total),
        None if !estimate.line_items.is_empty() => {
            format_money(
                estimate
                    .line_items
                    .iter()
                    .map(LineItem::amount_cents)
                    .fold(0, i64::saturating_add),
            )
        }
        None => String::new(),
    }
}

fn estimate_valid_until(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    date(ctx.estimate().and_then(|e| e.valid_until))
}

fn estimate_line_items(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    ctx.estimate()
        .map(|e| render_line_items(&e.line_items))
        .unwrap_or_default()
}

fn estimate_link(ctx: &ExecutionContext, resolver: &TokenResolver) -> String {
    match ctx.estimate_id {
        Some(id) => format!(
            r#"<a href="{}/estimates/{}">View your estimate</a>"#,
            resolver.base_url, id
        ),
        None => String::new(),
    }
}

// ===== Work order tokens =====

fn work_order_number(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.work_order().and_then(|w| w.work_order_number.as_deref()))
}

fn work_order_scheduled_date(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    date(ctx.work_order().and_then(|w| w.scheduled_date))
}

fn work_order_address(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.work_order().and_then(|w| w.address.as_deref()))
}

fn work_order_total(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    money(ctx.work_order().and_then(|w| w.total_cents))
}

// ===== Invoice tokens =====

fn invoice_number(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.invoice().and_then(|i| i.invoice_number.as_deref()))
}

fn invoice_amount_due(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    money(ctx.invoice().and_then(|i| i.amount_due_cents))
}

fn invoice_due_date(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    date(ctx.invoice().and_then(|i| i.due_date))
}

fn invoice_pay_button(ctx: &ExecutionContext, resolver: &TokenResolver) -> String {
    match ctx.invoice_id {
        Some(id) => format!(
            r#"<a href="{}/invoices/{}/pay" style="display:inline-block;background:#16a34a;color:#ffffff;padding:12px 24px;border-radius:6px;text-decoration:none;">Pay Invoice</a>"#,
            resolver.base_url, id
        ),
        None => String::new(),
    }
}

// ===== Business tokens =====

fn business_name(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.business.as_ref().and_then(|b| b.name.as_deref()))
}

fn business_phone(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.business.as_ref().and_then(|b| b.phone.as_deref()))
}

fn business_email(ctx: &ExecutionContext, _: &TokenResolver) -> String {
    text(ctx.business.as_ref().and_then(|b| b.email.as_deref()))
}
