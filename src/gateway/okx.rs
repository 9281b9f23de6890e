// =============================================================================
// OKX REST Gateway — public market-data endpoints
// =============================================================================
//
// Implements the MarketDataGateway contract against OKX v5 public endpoints.
// Only unauthenticated market-data routes are used; nothing here signs
// requests. OKX wraps every payload in `{ code, msg, data }` and encodes
// numerics as strings; the parsing helpers below tolerate both strings and
// raw numbers.
//
// The aggregated multi-exchange ticker additionally queries Binance spot as a
// secondary venue; when the secondary quote is unavailable the report is
// marked degraded rather than failing the whole call.
// =============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::gateway::{GatewayError, GatewayResult, MarketDataGateway};
use crate::pairs::{Pair, Timeframe};
use crate::types::{
    BookLevel, Candle, FundingRate, MultiTickerReport, OpenInterest, OrderBook, QuoteDegradation,
    QuoteHealth, SettleState, Ticker, Trade, TradeSide, VenueTicker,
};

/// Per-call provider deadline.
const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// OKX REST gateway over public market-data endpoints.
#[derive(Clone)]
pub struct OkxGateway {
    base_url: String,
    secondary_url: String,
    client: reqwest::Client,
}

impl OkxGateway {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client for OkxGateway");

        debug!("OkxGateway initialised (base_url=https://www.okx.com)");

        Self {
            base_url: "https://www.okx.com".to_string(),
            secondary_url: "https://api.binance.com".to_string(),
            client,
        }
    }

    /// Build a gateway against non-default hosts (used by tests and mirrors).
    pub fn with_base_urls(base_url: impl Into<String>, secondary_url: impl Into<String>) -> Self {
        let mut gw = Self::new();
        gw.base_url = base_url.into();
        gw.secondary_url = secondary_url.into();
        gw
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// GET an OKX endpoint and unwrap the `{ code, msg, data }` envelope.
    async fn get_data(&self, path_and_query: &str) -> GatewayResult<Value> {
        let url = format!("{}{}", self.base_url, path_and_query);

        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(format!("GET {path_and_query}"))
            } else {
                GatewayError::Transport(format!("GET {path_and_query}: {e}"))
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimited(format!("GET {path_and_query}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Parse(format!("GET {path_and_query}: {e}")))?;

        if !status.is_success() {
            return Err(GatewayError::Upstream(format!(
                "GET {path_and_query} returned {status}: {body}"
            )));
        }

        let code = body["code"].as_str().unwrap_or("0");
        if code != "0" {
            let msg = body["msg"].as_str().unwrap_or("unknown provider error");
            return Err(GatewayError::Upstream(format!(
                "GET {path_and_query} code {code}: {msg}"
            )));
        }

        Ok(body["data"].clone())
    }

    /// OKX bar label for a timeframe (minutes lowercase, hours/days uppercase).
    fn bar_label(tf: Timeframe) -> &'static str {
        match tf {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
        }
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_num(val: &Value, name: &str) -> GatewayResult<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .map_err(|_| GatewayError::Parse(format!("field {name}: cannot parse {s:?}")))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            Err(GatewayError::Parse(format!(
                "field {name}: expected string or number, got {val}"
            )))
        }
    }

    fn parse_ts(val: &Value, name: &str) -> GatewayResult<i64> {
        if let Some(s) = val.as_str() {
            s.parse::<i64>()
                .map_err(|_| GatewayError::Parse(format!("field {name}: cannot parse {s:?}")))
        } else if let Some(n) = val.as_i64() {
            Ok(n)
        } else {
            Err(GatewayError::Parse(format!(
                "field {name}: expected string or integer, got {val}"
            )))
        }
    }

    /// Fetch the secondary-venue 24h ticker. Errors are reported to the
    /// caller as degradation, not as a gateway failure.
    async fn secondary_ticker(&self, base: &str) -> Result<VenueTicker, String> {
        let url = format!(
            "{}/api/v3/ticker/24hr?symbol={}USDT",
            self.secondary_url, base
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("secondary venue unreachable: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("secondary venue returned {}", resp.status()));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("secondary venue payload: {e}"))?;

        let price = Self::parse_num(&body["lastPrice"], "lastPrice").map_err(|e| e.to_string())?;
        let volume =
            Self::parse_num(&body["quoteVolume"], "quoteVolume").map_err(|e| e.to_string())?;

        Ok(VenueTicker {
            venue: "binance".to_string(),
            price,
            volume_24h: volume,
        })
    }
}

impl Default for OkxGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataGateway for OkxGateway {
    async fn candles(&self, pair: &Pair, tf: Timeframe, limit: u32) -> GatewayResult<Vec<Candle>> {
        let path = format!(
            "/api/v5/market/candles?instId={}&bar={}&limit={}",
            pair.instrument_id(),
            Self::bar_label(tf),
            limit
        );
        let data = self.get_data(&path).await?;

        let rows = data
            .as_array()
            .ok_or_else(|| GatewayError::Parse("candles payload is not an array".into()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 6 => a,
                _ => {
                    warn!("skipping malformed candle row");
                    continue;
                }
            };

            candles.push(Candle {
                open_time: Self::parse_ts(&arr[0], "candle.ts")?,
                open: Self::parse_num(&arr[1], "candle.o")?,
                high: Self::parse_num(&arr[2], "candle.h")?,
                low: Self::parse_num(&arr[3], "candle.l")?,
                close: Self::parse_num(&arr[4], "candle.c")?,
                volume: Self::parse_num(&arr[5], "candle.vol")?,
            });
        }

        // OKX returns newest first; the core requires oldest first.
        candles.reverse();

        debug!(pair = %pair, tf = %tf, count = candles.len(), "candles fetched");
        Ok(candles)
    }

    async fn trades(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<Trade>> {
        let path = format!(
            "/api/v5/market/trades?instId={}&limit={}",
            pair.instrument_id(),
            limit
        );
        let data = self.get_data(&path).await?;

        let rows = data
            .as_array()
            .ok_or_else(|| GatewayError::Parse("trades payload is not an array".into()))?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let side = match row["side"].as_str() {
                Some("buy") => TradeSide::Buy,
                Some("sell") => TradeSide::Sell,
                other => {
                    warn!(side = ?other, "skipping trade with unknown side");
                    continue;
                }
            };

            trades.push(Trade {
                time: Self::parse_ts(&row["ts"], "trade.ts")?,
                price: Self::parse_num(&row["px"], "trade.px")?,
                size: Self::parse_num(&row["sz"], "trade.sz")?,
                side,
            });
        }

        // Newest first from the venue; flip to chronological.
        trades.reverse();

        debug!(pair = %pair, count = trades.len(), "trades fetched");
        Ok(trades)
    }

    async fn order_book(&self, pair: &Pair) -> GatewayResult<OrderBook> {
        let path = format!("/api/v5/market/books?instId={}&sz=50", pair.instrument_id());
        let data = self.get_data(&path).await?;

        let snapshot = data
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| GatewayError::Parse("order book payload is empty".into()))?;

        let parse_side = |side: &Value, name: &str| -> GatewayResult<Vec<BookLevel>> {
            let rows = side
                .as_array()
                .ok_or_else(|| GatewayError::Parse(format!("{name} side is not an array")))?;
            let mut levels = Vec::with_capacity(rows.len());
            for row in rows {
                let arr = match row.as_array() {
                    Some(a) if a.len() >= 2 => a,
                    _ => continue,
                };
                levels.push(BookLevel {
                    price: Self::parse_num(&arr[0], "level.px")?,
                    size: Self::parse_num(&arr[1], "level.sz")?,
                });
            }
            Ok(levels)
        };

        let book = OrderBook {
            bids: parse_side(&snapshot["bids"], "bids")?,
            asks: parse_side(&snapshot["asks"], "asks")?,
        };

        debug!(
            pair = %pair,
            bids = book.bids.len(),
            asks = book.asks.len(),
            "order book fetched"
        );
        Ok(book)
    }

    async fn ticker(&self, pair: &Pair) -> GatewayResult<Ticker> {
        let path = format!("/api/v5/market/ticker?instId={}", pair.instrument_id());
        let data = self.get_data(&path).await?;

        let row = data
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| GatewayError::Parse("ticker payload is empty".into()))?;

        let last = Self::parse_num(&row["last"], "ticker.last")?;
        let open_24h = Self::parse_num(&row["open24h"], "ticker.open24h").unwrap_or(last);
        let vol_ccy = Self::parse_num(&row["volCcy24h"], "ticker.volCcy24h").unwrap_or(0.0);

        let change_24h = if open_24h > 0.0 {
            (last - open_24h) / open_24h * 100.0
        } else {
            0.0
        };

        Ok(Ticker {
            price: last,
            volume_24h: vol_ccy,
            change_24h,
        })
    }

    async fn funding_rate(&self, pair: &Pair) -> GatewayResult<FundingRate> {
        let path = format!(
            "/api/v5/public/funding-rate?instId={}",
            pair.instrument_id()
        );
        let data = self.get_data(&path).await?;

        let row = data
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| GatewayError::Parse("funding payload is empty".into()))?;

        Ok(FundingRate {
            current_rate: Self::parse_num(&row["fundingRate"], "fundingRate")?,
            next_rate: Self::parse_num(&row["nextFundingRate"], "nextFundingRate").unwrap_or(0.0),
            next_time: Self::parse_ts(&row["fundingTime"], "fundingTime").unwrap_or(0),
            premium: Self::parse_num(&row["premium"], "premium").unwrap_or(0.0),
            interest_rate: Self::parse_num(&row["interestRate"], "interestRate").unwrap_or(0.0),
            settle_state: match row["settState"].as_str() {
                Some("processing") => SettleState::Processing,
                _ => SettleState::Settled,
            },
        })
    }

    async fn funding_history(&self, pair: &Pair, limit: u32) -> GatewayResult<Vec<FundingRate>> {
        let path = format!(
            "/api/v5/public/funding-rate-history?instId={}&limit={}",
            pair.instrument_id(),
            limit
        );
        let data = self.get_data(&path).await?;

        let rows = data
            .as_array()
            .ok_or_else(|| GatewayError::Parse("funding history payload is not an array".into()))?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            history.push(FundingRate {
                current_rate: Self::parse_num(&row["fundingRate"], "fundingRate")?,
                next_rate: 0.0,
                next_time: Self::parse_ts(&row["fundingTime"], "fundingTime").unwrap_or(0),
                premium: 0.0,
                interest_rate: 0.0,
                settle_state: SettleState::Settled,
            });
        }

        history.reverse();
        Ok(history)
    }

    async fn open_interest(&self, pair: &Pair) -> GatewayResult<OpenInterest> {
        let path = format!(
            "/api/v5/public/open-interest?instId={}",
            pair.instrument_id()
        );
        let data = self.get_data(&path).await?;

        let row = data
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| GatewayError::Parse("open interest payload is empty".into()))?;

        Ok(OpenInterest {
            oi_base: Self::parse_num(&row["oiCcy"], "oiCcy")?,
            oi_usd: Self::parse_num(&row["oiUsd"], "oiUsd").unwrap_or(0.0),
            time: Self::parse_ts(&row["ts"], "ts").unwrap_or(0),
        })
    }

    async fn open_interest_history(
        &self,
        pair: &Pair,
        hours: u32,
    ) -> GatewayResult<Vec<OpenInterest>> {
        let path = format!(
            "/api/v5/rubik/stat/contracts/open-interest-volume?ccy={}&period=1H",
            pair.base()
        );
        let data = self.get_data(&path).await?;

        let rows = data
            .as_array()
            .ok_or_else(|| GatewayError::Parse("OI history payload is not an array".into()))?;

        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 2 => a,
                _ => continue,
            };
            history.push(OpenInterest {
                oi_base: 0.0,
                oi_usd: Self::parse_num(&arr[1], "oi_hist.oi")?,
                time: Self::parse_ts(&arr[0], "oi_hist.ts")?,
            });
        }

        history.sort_by_key(|o| o.time);
        let keep = history.len().saturating_sub(hours as usize);
        Ok(history.split_off(keep))
    }

    async fn multi_exchange_ticker(&self, base: &str) -> GatewayResult<MultiTickerReport> {
        let pair = Pair::parse(base)
            .map_err(|e| GatewayError::Upstream(format!("aggregated quote: {e}")))?;

        // Primary venue must answer; the secondary only degrades the report.
        let primary = self.ticker(&pair).await?;

        let mut tickers = vec![VenueTicker {
            venue: "okx".to_string(),
            price: primary.price,
            volume_24h: primary.volume_24h,
        }];

        let degradation = match self.secondary_ticker(pair.base()).await {
            Ok(t) => {
                tickers.push(t);
                QuoteDegradation {
                    degraded: false,
                    fallback_reason: None,
                    health_status: QuoteHealth::Healthy,
                }
            }
            Err(reason) => {
                warn!(base = %pair, reason = %reason, "secondary venue quote unavailable");
                QuoteDegradation {
                    degraded: true,
                    fallback_reason: Some(reason),
                    health_status: QuoteHealth::Degraded,
                }
            }
        };

        Ok(MultiTickerReport {
            tickers,
            degradation,
        })
    }
}

impl std::fmt::Debug for OkxGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxGateway")
            .field("base_url", &self.base_url)
            .field("secondary_url", &self.secondary_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_labels() {
        assert_eq!(OkxGateway::bar_label(Timeframe::M15), "15m");
        assert_eq!(OkxGateway::bar_label(Timeframe::H1), "1H");
        assert_eq!(OkxGateway::bar_label(Timeframe::D1), "1D");
    }

    #[test]
    fn parse_num_string_or_number() {
        assert_eq!(
            OkxGateway::parse_num(&serde_json::json!("42.5"), "x").unwrap(),
            42.5
        );
        assert_eq!(
            OkxGateway::parse_num(&serde_json::json!(42.5), "x").unwrap(),
            42.5
        );
        assert!(OkxGateway::parse_num(&serde_json::json!(null), "x").is_err());
        assert!(OkxGateway::parse_num(&serde_json::json!("abc"), "x").is_err());
    }

    #[test]
    fn parse_ts_string_or_number() {
        assert_eq!(
            OkxGateway::parse_ts(&serde_json::json!("1700000000000"), "ts").unwrap(),
            1_700_000_000_000
        );
        assert_eq!(
            OkxGateway::parse_ts(&serde_json::json!(1_700_000_000_000i64), "ts").unwrap(),
            1_700_000_000_000
        );
    }
}
