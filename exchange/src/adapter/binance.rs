use super::{
    super::{
        Exchange, Kline, MarketKind, Price, Qty, RawTrade, TickerInfo, Timeframe, Trade, Volume,
        connect::{self, State, connect_ws},
        de_string_to_price, de_string_to_qty,
        resilience::{Reconnector, Retry, RetryPolicy},
    },
    AdapterError, Event,
};

use fastwebsockets::OpCode;
use serde::Deserialize;
use sonic_rs::{FastStr, to_object_iter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::{sync::LazyLock, time::Duration};

const SPOT_DOMAIN: &str = "https://api.binance.com";
const LINEAR_PERP_DOMAIN: &str = "https://fapi.binance.com";

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Hard cap of the klines endpoint per request
const MAX_KLINES_PER_REQUEST: usize = 1000;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_default()
});

fn exchange_from_market_type(market: MarketKind) -> Exchange {
    match market {
        MarketKind::Spot => Exchange::BinanceSpot,
        MarketKind::LinearPerps => Exchange::BinanceLinear,
    }
}

fn ws_domain_from_market_type(market: MarketKind) -> &'static str {
    match market {
        MarketKind::Spot => "stream.binance.com",
        MarketKind::LinearPerps => "fstream.binance.com",
    }
}

#[derive(Deserialize, Debug)]
struct SonicTrade<'a> {
    #[serde(rename = "T")]
    time: u64,
    #[serde(rename = "p")]
    price: &'a str,
    #[serde(rename = "q")]
    qty: &'a str,
    /// buyer is the maker, so the aggressor sold
    #[serde(rename = "m")]
    is_sell: bool,
}

impl SonicTrade<'_> {
    fn into_raw(self) -> RawTrade {
        RawTrade {
            time: self.time,
            price: self.price.to_string(),
            qty: self.qty.to_string(),
            side: if self.is_sell { "sell" } else { "buy" }.to_string(),
        }
    }
}

enum StreamWrapper {
    Trade,
}

impl StreamWrapper {
    fn from_stream_type(stream_type: &FastStr) -> Option<Self> {
        stream_type
            .split('@')
            .nth(1)
            .and_then(|after_at| match after_at {
                s if s.starts_with("ag") => Some(StreamWrapper::Trade),
                _ => None,
            })
    }
}

/// Decodes one combined-stream frame into an unvalidated trade.
fn feed_de(slice: &[u8]) -> Result<RawTrade, AdapterError> {
    let mut stream_type: Option<StreamWrapper> = None;

    for elem in to_object_iter(slice) {
        let (k, v) = elem.map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if k == "stream" {
            if let Some(s) = StreamWrapper::from_stream_type(&v.as_raw_faststr()) {
                stream_type = Some(s);
            }
        } else if k == "data" {
            match stream_type {
                Some(StreamWrapper::Trade) => {
                    let raw = v.as_raw_faststr();
                    let trade: SonicTrade = sonic_rs::from_str(&raw)
                        .map_err(|e| AdapterError::ParseError(e.to_string()))?;

                    return Ok(trade.into_raw());
                }
                None => {
                    log::error!("Unknown stream type");
                }
            }
        } else {
            log::error!("Unknown data: {:?}", k);
        }
    }

    Err(AdapterError::ParseError(
        "Failed to parse ws data".to_string(),
    ))
}

/// Reconnecting aggTrade loop; ends on cancellation, a dropped receiver or an exhausted policy.
pub async fn run_trade_stream(
    ticker_info: TickerInfo,
    policy: RetryPolicy,
    cancel: CancellationToken,
    output: mpsc::Sender<Event>,
) {
    let market = ticker_info.market_type();
    let exchange = exchange_from_market_type(market);
    let symbol = ticker_info.ticker.as_str().to_lowercase();

    let domain = ws_domain_from_market_type(market);
    let url = format!("wss://{domain}/stream?streams={symbol}@aggTrade");

    let mut state = State::Disconnected;
    let mut reconnector = Reconnector::new(policy);

    loop {
        if cancel.is_cancelled() || output.is_closed() {
            log::debug!("[{exchange}] trade stream stopped");
            return;
        }

        match &mut state {
            State::Disconnected => {
                let connected = tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = connect_ws(domain, &url) => result,
                };

                match connected {
                    Ok(websocket) => {
                        log::info!("[{exchange}] trade stream connected: {url}");
                        state = State::Connected(websocket);
                        reconnector.reset();

                        let _ = output.send(Event::Connected(exchange)).await;
                    }
                    Err(err) => {
                        log::warn!(
                            "[{exchange}] connect attempt {} failed: {err}",
                            reconnector.attempts() + 1
                        );
                        let _ = output
                            .send(Event::Disconnected(
                                exchange,
                                format!("Failed to connect to websocket: {err}"),
                            ))
                            .await;

                        match reconnector.wait(&cancel).await {
                            Retry::Attempt => {}
                            Retry::Cancelled => return,
                            Retry::Exhausted => {
                                log::error!("[{exchange}] giving up after {} retries", reconnector.attempts());
                                let _ = output
                                    .send(Event::Disconnected(
                                        exchange,
                                        "Retry attempts exhausted".to_string(),
                                    ))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
            State::Connected(ws) => {
                let read = tokio::select! {
                    _ = cancel.cancelled() => return,
                    read = tokio::time::timeout(connect::WS_READ_TIMEOUT, ws.read_frame()) => read,
                };

                match read {
                    Ok(Ok(msg)) => match msg.opcode {
                        OpCode::Text => match feed_de(&msg.payload[..]) {
                            Ok(raw) => {
                                let event = match Trade::try_from(raw) {
                                    Ok(trade) => Event::TradesReceived(
                                        exchange,
                                        vec![trade].into_boxed_slice(),
                                    ),
                                    Err(malformed) => {
                                        log::warn!("[{exchange}] dropped trade: {malformed}");
                                        Event::Malformed(exchange, malformed)
                                    }
                                };
                                let _ = output.send(event).await;
                            }
                            Err(err) => log::debug!("[{exchange}] ignored frame: {err}"),
                        },
                        OpCode::Close => {
                            state = State::Disconnected;
                            let _ = output
                                .send(Event::Disconnected(
                                    exchange,
                                    "Connection closed".to_string(),
                                ))
                                .await;
                        }
                        _ => {}
                    },
                    Ok(Err(e)) => {
                        state = State::Disconnected;
                        let _ = output
                            .send(Event::Disconnected(
                                exchange,
                                "Error reading frame: ".to_string() + &e.to_string(),
                            ))
                            .await;
                    }
                    Err(_elapsed) => {
                        log::warn!("[{exchange}] trade read timeout, reconnecting");
                        state = State::Disconnected;
                        let _ = output
                            .send(Event::Disconnected(
                                exchange,
                                "Read timeout (connection stale)".to_string(),
                            ))
                            .await;
                    }
                }
            }
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
struct FetchedKline(
    u64,
    #[serde(deserialize_with = "de_string_to_price")] Price,
    #[serde(deserialize_with = "de_string_to_price")] Price,
    #[serde(deserialize_with = "de_string_to_price")] Price,
    #[serde(deserialize_with = "de_string_to_price")] Price,
    #[serde(deserialize_with = "de_string_to_qty")] Qty,
    u64,
    String,
    u32,
    #[serde(deserialize_with = "de_string_to_qty")] Qty,
    String,
    String,
);

impl FetchedKline {
    fn into_kline(self, ticker_info: TickerInfo) -> Kline {
        let FetchedKline(
            time,
            open,
            high,
            low,
            close,
            volume,
            _close_time,
            _quote_asset_volume,
            _number_of_trades,
            taker_buy_base_asset_volume,
            _taker_buy_quote_asset_volume,
            _ignore,
        ) = self;

        let buy_volume = taker_buy_base_asset_volume;
        let sell_volume = if volume >= buy_volume {
            volume - buy_volume
        } else {
            Qty::ZERO
        };

        Kline::new(
            time,
            (open, high, low, close),
            Volume::BuySell(buy_volume, sell_volume),
            ticker_info.min_ticksize,
        )
    }
}

fn parse_klines(body: &str, ticker_info: TickerInfo) -> Result<Vec<Kline>, AdapterError> {
    let fetched: Vec<FetchedKline> =
        sonic_rs::from_str(body).map_err(|e| AdapterError::ParseError(e.to_string()))?;

    Ok(fetched
        .into_iter()
        .map(|k| k.into_kline(ticker_info))
        .collect())
}

pub async fn fetch_klines(
    ticker_info: TickerInfo,
    timeframe: Timeframe,
    limit: usize,
) -> Result<Vec<Kline>, AdapterError> {
    let symbol_str = ticker_info.ticker.as_str().to_uppercase();

    let base_url = match ticker_info.market_type() {
        MarketKind::Spot => SPOT_DOMAIN.to_string() + "/api/v3/klines",
        MarketKind::LinearPerps => LINEAR_PERP_DOMAIN.to_string() + "/fapi/v1/klines",
    };

    let limit = limit.min(MAX_KLINES_PER_REQUEST);
    let url = format!("{base_url}?symbol={symbol_str}&interval={timeframe}&limit={limit}");

    let response = HTTP_CLIENT.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AdapterError::InvalidRequest(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    let body = response.text().await?;

    let klines = parse_klines(&body, ticker_info)?;
    log::debug!("Fetched {} klines for {symbol_str} {timeframe}", klines.len());

    Ok(klines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ticker, TradeSide};

    fn btc() -> TickerInfo {
        TickerInfo::new(
            Ticker::new("BTCUSDT", Exchange::BinanceLinear).unwrap(),
            0.1,
        )
    }

    #[test]
    fn decodes_agg_trade_frames() {
        let frame = br#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1700000000100,"s":"BTCUSDT","a":5933014,"p":"65000.10","q":"0.250","f":100,"l":105,"T":1700000000050,"m":true}}"#;

        let trade = Trade::try_from(feed_de(frame).unwrap()).unwrap();
        assert_eq!(trade.time, 1_700_000_000_050);
        assert_eq!(trade.price, "65000.1".parse().unwrap());
        assert_eq!(trade.qty, "0.25".parse().unwrap());
        assert_eq!(trade.side, TradeSide::Sell);
    }

    #[test]
    fn unknown_streams_are_parse_errors() {
        let frame = br#"{"stream":"btcusdt@depth","data":{"e":"depthUpdate"}}"#;
        assert!(matches!(feed_de(frame), Err(AdapterError::ParseError(_))));
    }

    #[test]
    fn malformed_trade_payload_surfaces_as_malformed() {
        let frame = br#"{"stream":"btcusdt@aggTrade","data":{"T":1,"p":"-1","q":"1","m":false}}"#;
        let raw = feed_de(frame).unwrap();
        assert!(Trade::try_from(raw).is_err());
    }

    #[test]
    fn parses_rest_klines_with_taker_split() {
        let body = r#"[[1700000000000,"100.0","110.0","90.0","105.0","1000",1700000059999,"0",42,"600","0","0"]]"#;
        let klines = parse_klines(body, btc()).unwrap();

        assert_eq!(klines.len(), 1);
        let k = klines[0];
        assert_eq!(k.time, 1_700_000_000_000);
        assert!(k.is_bullish());
        assert_eq!(
            k.volume.buy_sell(),
            Some(("600".parse().unwrap(), "400".parse().unwrap()))
        );
    }
}
