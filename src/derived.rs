//! Metrics computed from raw aggregated counters. Every function returns 0
//! for a zero denominator and is rounded to two decimals.

pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 0.0;
    }
    let value = numerator / denominator;
    if value.is_finite() { value } else { 0.0 }
}

/// Click-through rate, percent.
pub fn ctr(clicks: f64, impressions: f64) -> f64 {
    round2(ratio(clicks, impressions) * 100.0)
}

/// Cost per click.
pub fn cpc(spend: f64, clicks: f64) -> f64 {
    round2(ratio(spend, clicks))
}

/// Cost per thousand impressions.
pub fn cpm(spend: f64, impressions: f64) -> f64 {
    round2(ratio(spend, impressions) * 1000.0)
}

/// Share of sessions that were not engaged, percent.
pub fn bounce_rate(sessions: f64, engaged_sessions: f64) -> f64 {
    round2(ratio(sessions - engaged_sessions, sessions) * 100.0)
}

pub fn average_order_value(revenue: f64, transactions: f64) -> f64 {
    round2(ratio(revenue, transactions))
}

/// Engagements per impression, percent.
pub fn engagement_rate(engagements: f64, impressions: f64) -> f64 {
    round2(ratio(engagements, impressions) * 100.0)
}
