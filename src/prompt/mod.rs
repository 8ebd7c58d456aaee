// =============================================================================
// PromptBuilder — deterministic render/parse pair around the oracle boundary
// =============================================================================
//
// `render` is a pure function of its inputs: same bot + portfolio + snapshots
// always produces the exact same string, which is what lets the oracle layer
// use its hash as a cache key. `parse` is equally deterministic given a reply
// string and the current prices used to backfill missing fields.

use std::collections::HashMap;
use std::fmt::Write as _;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};

use crate::indicators::latest_valid;
use crate::types::{Bot, Decision, MarketSnapshot, Side, Signal};

/// Minimum number of trailing indicator points each series must surface in
/// the rendered prompt (warmup-trimmed `None`s are skipped).
const TRAILING_POINTS: usize = 10;

#[derive(Debug, Clone)]
pub struct PortfolioSummary {
    pub cash: Decimal,
    pub invested: Decimal,
    pub equity: Decimal,
    pub return_pct: Decimal,
    pub sharpe: Option<Decimal>,
    pub open_positions: Vec<OpenPositionSummary>,
}

#[derive(Debug, Clone)]
pub struct OpenPositionSummary {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl_pct: Decimal,
}

/// Renders a deterministic prompt for `bot` across `snapshots`, one entry per
/// tradable symbol, in the order given.
pub fn render(bot: &Bot, portfolio: &PortfolioSummary, snapshots: &[MarketSnapshot]) -> String {
    let mut out = String::new();

    writeln!(out, "You are the trading oracle for bot \"{}\" ({}).", bot.name, bot.model).ok();
    writeln!(out, "Risk policy: max_position_pct={} max_exposure_pct={} stop_loss_pct={} take_profit_pct={} min_rr_ratio={}",
        bot.risk_params.max_position_pct, bot.risk_params.max_exposure_pct,
        bot.risk_params.stop_loss_pct, bot.risk_params.take_profit_pct, bot.risk_params.min_rr_ratio).ok();
    out.push('\n');

    writeln!(out, "PORTFOLIO:").ok();
    writeln!(out, "  cash={} invested={} equity={} return_pct={}", portfolio.cash, portfolio.invested, portfolio.equity, portfolio.return_pct).ok();
    if let Some(sharpe) = portfolio.sharpe {
        writeln!(out, "  sharpe={sharpe}").ok();
    }
    if portfolio.open_positions.is_empty() {
        writeln!(out, "  open_positions: none").ok();
    } else {
        writeln!(out, "  open_positions:").ok();
        for p in &portfolio.open_positions {
            writeln!(out, "    {} {} entry={} current={} pnl_pct={}", p.symbol, p.side, p.entry_price, p.current_price, p.unrealized_pnl_pct).ok();
        }
    }
    out.push('\n');

    for snap in snapshots {
        writeln!(out, "SYMBOL {}:", snap.symbol).ok();
        writeln!(out, "  last_price={}", snap.last_price).ok();
        writeln!(out, "  funding_rate={}", render_opt(snap.funding_rate)).ok();
        writeln!(out, "  open_interest={}", render_opt(snap.open_interest)).ok();

        render_timeframe(&mut out, "short", snap);
        render_timeframe(&mut out, "long", snap);
        out.push('\n');
    }

    writeln!(out, "OUTPUT GRAMMAR: respond with one JSON object per symbol addressed, each containing").ok();
    writeln!(out, "  signal (entry|exit|hold), side (long|short, for entry), confidence (0..1),").ok();
    writeln!(out, "  size_pct (0..1], entry_price, stop_loss, profit_target,").ok();
    writeln!(out, "  invalidation_condition (text), justification (text).").ok();

    out
}

fn render_timeframe(out: &mut String, label: &str, snap: &MarketSnapshot) {
    let ind = if label == "short" { &snap.indicators_short } else { &snap.indicators_long };
    writeln!(out, "  [{label}]").ok();
    write_series(out, "sma", &ind.sma);
    write_series(out, "ema_fast", &ind.ema_fast);
    write_series(out, "ema_slow", &ind.ema_slow);
    write_series(out, "rsi", &ind.rsi);
    write_series(out, "macd", &ind.macd);
    write_series(out, "macd_signal", &ind.macd_signal);
    write_series(out, "bollinger_upper", &ind.bollinger_upper);
    write_series(out, "bollinger_lower", &ind.bollinger_lower);
    write_series(out, "atr", &ind.atr);
    write_series(out, "stochastic_k", &ind.stochastic_k);
    write_series(out, "obv", &ind.obv);
    write_series(out, "vwap", &ind.vwap);
    write_series(out, "adx", &ind.adx);
}

fn write_series(out: &mut String, name: &str, series: &[Option<Decimal>]) {
    let trailing: Vec<String> = series
        .iter()
        .rev()
        .filter_map(|v| *v)
        .take(TRAILING_POINTS)
        .map(|v| v.to_string())
        .collect();
    let rendered: Vec<String> = trailing.into_iter().rev().collect();
    writeln!(out, "    {name}: [{}] latest={}", rendered.join(", "), render_opt(latest_valid(series))).ok();
}

fn render_opt(v: Option<Decimal>) -> String {
    match v {
        Some(d) => d.to_string(),
        None => "unavailable".to_string(),
    }
}

/// Stable cache key for the oracle layer — not a security hash, just a
/// deterministic fingerprint of the prompt text plus call parameters.
pub fn prompt_hash(model: &str, prompt: &str, max_tokens: u32, temperature: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(prompt.as_bytes());
    hasher.update(max_tokens.to_le_bytes());
    hasher.update(temperature.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Parses an oracle reply into one `Decision` per symbol. Tries strict JSON
/// first (one object per symbol, or an array/object keyed by symbol); on
/// failure falls back to keyword text extraction at reduced confidence.
pub fn parse(reply: &str, current_prices: &HashMap<String, Decimal>, bot: &Bot) -> HashMap<String, Decision> {
    let mut decisions = HashMap::new();

    if let Some(json_decisions) = parse_json(reply, current_prices, bot) {
        return json_decisions;
    }

    for (symbol, price) in current_prices {
        decisions.insert(symbol.clone(), text_fallback(reply, symbol, *price, bot));
    }
    decisions
}

fn parse_json(reply: &str, current_prices: &HashMap<String, Decimal>, bot: &Bot) -> Option<HashMap<String, Decision>> {
    let value: serde_json::Value = extract_json(reply)?;
    let mut out = HashMap::new();

    let entries: Vec<(String, &serde_json::Value)> = match &value {
        serde_json::Value::Object(map) if map.contains_key("signal") => {
            // Single-symbol reply; only valid when exactly one symbol was asked about.
            if current_prices.len() == 1 {
                let symbol = current_prices.keys().next().cloned()?;
                vec![(symbol, &value)]
            } else {
                return None;
            }
        }
        serde_json::Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        serde_json::Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.get("symbol").and_then(|s| s.as_str()).map(|s| (s.to_string(), v)))
            .collect(),
        _ => return None,
    };

    if entries.is_empty() {
        return None;
    }

    for (symbol, obj) in entries {
        let current_price = current_prices.get(&symbol).copied().unwrap_or(Decimal::ZERO);
        if let Some(decision) = decision_from_json(&symbol, obj, current_price, bot) {
            out.insert(symbol, decision);
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

fn extract_json(reply: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(reply.trim()) {
        return Some(v);
    }
    // LLMs often wrap JSON in prose or code fences; grab the widest balanced
    // brace/bracket span and retry.
    let start = reply.find(['{', '['])?;
    let end = reply.rfind(['}', ']'])?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

fn decision_from_json(symbol: &str, obj: &serde_json::Value, current_price: Decimal, bot: &Bot) -> Option<Decision> {
    let signal = match obj.get("signal").and_then(|v| v.as_str()).unwrap_or("hold") {
        "entry" => Signal::Entry,
        "exit" => Signal::Exit,
        _ => Signal::Hold,
    };

    let side = obj.get("side").and_then(|v| v.as_str()).and_then(|s| match s {
        "long" => Some(Side::Long),
        "short" => Some(Side::Short),
        _ => None,
    });

    let confidence = coerce_decimal(obj.get("confidence")).unwrap_or(Decimal::ZERO).clamp(Decimal::ZERO, Decimal::ONE);
    let size_pct = coerce_decimal(obj.get("size_pct")).unwrap_or(dec!(0.1)).clamp(Decimal::new(1, 2), Decimal::ONE);

    let entry_price = coerce_decimal(obj.get("entry_price")).or(Some(current_price));

    let (stop_loss, profit_target) = match (coerce_decimal(obj.get("stop_loss")), coerce_decimal(obj.get("profit_target"))) {
        (Some(sl), Some(tp)) => (Some(sl), Some(tp)),
        (sl, tp) => derive_sl_tp(sl, tp, side, current_price, bot),
    };

    let invalidation_condition = obj.get("invalidation_condition").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let justification = obj.get("justification").and_then(|v| v.as_str()).unwrap_or("").to_string();

    Some(Decision {
        symbol: symbol.to_string(),
        signal,
        side,
        confidence,
        size_pct,
        entry_price,
        stop_loss,
        profit_target,
        invalidation_condition,
        justification,
    })
}

fn derive_sl_tp(
    sl: Option<Decimal>,
    tp: Option<Decimal>,
    side: Option<Side>,
    current_price: Decimal,
    bot: &Bot,
) -> (Option<Decimal>, Option<Decimal>) {
    let side = side.unwrap_or(Side::Long);
    let sl_pct = bot.risk_params.stop_loss_pct / Decimal::ONE_HUNDRED;
    let tp_pct = bot.risk_params.take_profit_pct / Decimal::ONE_HUNDRED;

    let derived_sl = sl.or_else(|| {
        Some(match side {
            Side::Long => current_price * (Decimal::ONE - sl_pct),
            Side::Short => current_price * (Decimal::ONE + sl_pct),
        })
    });
    let derived_tp = tp.or_else(|| {
        Some(match side {
            Side::Long => current_price * (Decimal::ONE + tp_pct),
            Side::Short => current_price * (Decimal::ONE - tp_pct),
        })
    });
    (derived_sl, derived_tp)
}

fn coerce_decimal(v: Option<&serde_json::Value>) -> Option<Decimal> {
    match v {
        // Parse through the number's own textual representation rather than
        // `as_f64()` — a bare numeric literal in an oracle reply must not
        // take an f64 detour on the way to a monetary `Decimal`.
        Some(serde_json::Value::Number(n)) => n.to_string().parse::<Decimal>().ok(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Keyword-based fallback for replies that are not valid JSON. Conservative:
/// conflicting or ambiguous text defaults to `hold` at zero confidence.
fn text_fallback(reply: &str, symbol: &str, current_price: Decimal, bot: &Bot) -> Decision {
    let upper = reply.to_uppercase();
    let has_long = upper.contains("LONG");
    let has_short = upper.contains("SHORT");
    let has_hold = upper.contains("HOLD");

    let (signal, side, confidence) = if has_hold || (has_long && has_short) || (!has_long && !has_short) {
        (Signal::Hold, None, Decimal::ZERO)
    } else if has_long {
        (Signal::Entry, Some(Side::Long), dec!(0.3))
    } else {
        (Signal::Entry, Some(Side::Short), dec!(0.3))
    };

    let (stop_loss, profit_target) = if signal == Signal::Entry {
        derive_sl_tp(None, None, side, current_price, bot)
    } else {
        (None, None)
    };

    Decision {
        symbol: symbol.to_string(),
        signal,
        side,
        confidence,
        size_pct: dec!(0.1),
        entry_price: Some(current_price),
        stop_loss,
        profit_target,
        invalidation_condition: String::new(),
        justification: "text-extraction fallback".to_string(),
    }
}
