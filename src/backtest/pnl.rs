// =============================================================================
// Trade PnL and aggregate session metrics — §4.2 "Trade PnL" / "Atomic persistence"
// =============================================================================
//
// Every dollar figure here is `rust_decimal::Decimal`, rounded half-up via
// `money::round_half_up` — no binary floating point touches a P&L value.
// =============================================================================

use rust_decimal::Decimal;

use crate::domain::{EquityPoint, SessionMetrics, TradeLog};
use crate::instruments::InstrumentSpec;
use crate::money::round_half_up;
use crate::types::Side;

pub struct TradePnl {
    pub gross: Decimal,
    pub fees: Decimal,
    pub slippage: Decimal,
    pub net: Decimal,
}

/// `tickValue = pointValue × tickSize`; `ticks = (exit-entry)/tickSize`
/// (negated for SHORT); `gross = ticks × tickValue × qty`;
/// `fees = commission × 2 × qty`; `slippage = slippageTicks × tickValue × 2 × qty`;
/// `net = gross - fees - slippage`.
pub fn compute_trade_pnl(side: Side, entry: Decimal, exit: Decimal, qty: u32, spec: &InstrumentSpec) -> TradePnl {
    let qty_dec = Decimal::from(qty);
    let tick_value = spec.point_value * spec.tick_size;
    let raw_ticks = (exit - entry) / spec.tick_size;
    let ticks = match side {
        Side::Long => raw_ticks,
        Side::Short => -raw_ticks,
    };

    let gross = round_half_up(ticks * tick_value * qty_dec, 2);
    let fees = round_half_up(spec.commission_per_contract * Decimal::from(2) * qty_dec, 2);
    let slippage = round_half_up(spec.slippage_ticks * tick_value * Decimal::from(2) * qty_dec, 2);
    let net = gross - fees - slippage;

    TradePnl { gross, fees, slippage, net }
}

const PROFIT_FACTOR_FLOOR: f64 = 999.0;

/// Aggregate metrics across a completed session's trade log. Callers are
/// expected to have already enforced the zero-trades guard; this function
/// returns a metrics struct with every field populated whenever `trades` is
/// non-empty, satisfying §8 invariant 2.
pub fn aggregate_metrics(trades: &[TradeLog], starting_capital: Decimal) -> SessionMetrics {
    if trades.is_empty() {
        return SessionMetrics::default();
    }

    let total_trades = trades.len() as u32;
    let winning_trades = trades.iter().filter(|t| t.net_pnl > Decimal::ZERO).count() as u32;
    let losing_trades = trades.iter().filter(|t| t.net_pnl < Decimal::ZERO).count() as u32;
    let win_rate = f64::from(winning_trades) / f64::from(total_trades) * 100.0;

    let net_pnl: Decimal = trades.iter().map(|t| t.net_pnl).sum();

    let gross_win: Decimal = trades.iter().filter(|t| t.net_pnl > Decimal::ZERO).map(|t| t.net_pnl).sum();
    let gross_loss: Decimal = trades.iter().filter(|t| t.net_pnl < Decimal::ZERO).map(|t| t.net_pnl).sum();
    let profit_factor = if gross_loss.is_zero() {
        PROFIT_FACTOR_FLOOR
    } else {
        to_f64(gross_win) / to_f64(gross_loss).abs()
    };

    let returns: Vec<f64> = trades
        .iter()
        .map(|t| {
            if starting_capital.is_zero() {
                0.0
            } else {
                to_f64(t.net_pnl) / to_f64(starting_capital)
            }
        })
        .collect();
    let avg_return = mean(&returns);
    let std_dev = std_deviation(&returns, avg_return);
    let sharpe = if std_dev > 0.0 { (avg_return / std_dev) * 252f64.sqrt() } else { 0.0 };

    let curve = equity_curve(trades, starting_capital);
    let max_drawdown_pct = curve.iter().map(|p| p.drawdown_pct).fold(0.0, f64::max);

    let expectancy = net_pnl / Decimal::from(total_trades);

    SessionMetrics {
        total_trades,
        winning_trades,
        losing_trades,
        win_rate: Some(win_rate),
        net_pnl: Some(net_pnl),
        sharpe: Some(sharpe),
        max_drawdown_pct: Some(max_drawdown_pct),
        profit_factor: Some(profit_factor),
        expectancy: Some(expectancy),
    }
}

/// Time-stamped running equity and drawdown-from-peak, one point per trade
/// close (`exit_ts`).
pub fn equity_curve(trades: &[TradeLog], starting_capital: Decimal) -> Vec<EquityPoint> {
    let mut equity = starting_capital;
    let mut peak = starting_capital;
    let mut points = Vec::with_capacity(trades.len());

    for trade in trades {
        equity += trade.net_pnl;
        if equity > peak {
            peak = equity;
        }
        let drawdown_pct = if peak.is_zero() {
            0.0
        } else {
            to_f64((peak - equity) / peak) * 100.0
        };
        points.push(EquityPoint { ts: trade.exit_ts, equity, drawdown_pct });
    }

    points
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_deviation(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let variance = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    variance.sqrt()
}

fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(net_pnl: Decimal) -> TradeLog {
        TradeLog {
            id: Uuid::new_v4(),
            backtest_session_id: Uuid::new_v4(),
            entry_reason_code: "BREAKOUT".to_string(),
            side: Side::Long,
            entry_price: dec!(4500),
            exit_price: dec!(4510),
            entry_ts: Utc::now(),
            exit_ts: Utc::now(),
            exit_reason: "TAKE_PROFIT".to_string(),
            quantity: 1,
            gross_pnl: net_pnl,
            fees: dec!(0),
            slippage: dec!(0),
            net_pnl,
            trace_id: "t1".to_string(),
            rule_version: "1".to_string(),
        }
    }

    #[test]
    fn long_trade_pnl_matches_formula() {
        let spec = instruments::lookup("MES").unwrap();
        let pnl = compute_trade_pnl(Side::Long, dec!(4500.00), dec!(4510.00), 2, spec);
        // ticks = 40, tickValue = 5*0.25 = 1.25, gross = 40*1.25*2 = 100
        assert_eq!(pnl.gross, dec!(100.00));
        // fees = 0.74*2*2 = 2.96
        assert_eq!(pnl.fees, dec!(2.96));
        // slippage = 0.5*1.25*2*2 = 2.50
        assert_eq!(pnl.slippage, dec!(2.50));
        assert_eq!(pnl.net, pnl.gross - pnl.fees - pnl.slippage);
    }

    #[test]
    fn short_trade_negates_ticks() {
        let spec = instruments::lookup("MES").unwrap();
        let long_pnl = compute_trade_pnl(Side::Long, dec!(4500.00), dec!(4510.00), 1, spec);
        let short_pnl = compute_trade_pnl(Side::Short, dec!(4500.00), dec!(4510.00), 1, spec);
        assert_eq!(long_pnl.gross, -short_pnl.gross);
    }

    #[test]
    fn profit_factor_floors_at_999_with_no_losses() {
        let trades = vec![trade(dec!(10)), trade(dec!(20))];
        let metrics = aggregate_metrics(&trades, dec!(10_000));
        assert_eq!(metrics.profit_factor, Some(999.0));
    }

    #[test]
    fn per_trade_pnl_sums_to_aggregate_net_pnl() {
        let trades = vec![trade(dec!(10)), trade(dec!(-5)), trade(dec!(20))];
        let metrics = aggregate_metrics(&trades, dec!(10_000));
        let sum: Decimal = trades.iter().map(|t| t.net_pnl).sum();
        assert_eq!(metrics.net_pnl, Some(sum));
    }

    #[test]
    fn equity_curve_tracks_drawdown_from_peak() {
        let trades = vec![trade(dec!(100)), trade(dec!(-50)), trade(dec!(-50))];
        let curve = equity_curve(&trades, dec!(1000));
        assert_eq!(curve.len(), 3);
        assert!(curve[2].drawdown_pct > 0.0);
    }
}
