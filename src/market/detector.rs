//! Symbol to market detection

use super::Market;

const CRYPTO_BASES: &[&str] = &[
    "BTC", "ETH", "BNB", "ADA", "SOL", "XRP", "DOT", "DOGE", "MATIC", "AVAX", "LINK", "UNI",
    "ATOM", "ALGO", "VET", "TRX", "LTC", "BCH", "EOS", "XLM",
];

const INDIAN_STOCKS: &[&str] = &[
    "RELIANCE",
    "TCS",
    "HDFCBANK",
    "INFY",
    "ICICIBANK",
    "SBIN",
    "BHARTIARTL",
    "ITC",
    "WIPRO",
    "MARUTI",
    "HINDUNILVR",
    "BAJFINANCE",
    "ASIANPAINT",
    "HCLTECH",
    "KOTAKBANK",
];

const NASDAQ_STOCKS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "TSLA", "META", "NFLX", "ADBE", "INTC", "CSCO",
    "PEP", "COST",
];

/// Detect the market a symbol trades on
///
/// Order: explicit exchange suffix, crypto pair patterns, known Indian large caps,
/// known NASDAQ listings, then NYSE as the fallback.
pub fn detect_market(symbol: &str) -> Market {
    let symbol = symbol.trim().to_uppercase();

    if symbol.ends_with(".NS") {
        return Market::Nse;
    }
    if symbol.ends_with(".BO") {
        return Market::Bse;
    }

    if is_crypto(&symbol) {
        return Market::Crypto;
    }

    if INDIAN_STOCKS.contains(&symbol.as_str()) {
        return Market::Nse;
    }

    if NASDAQ_STOCKS.contains(&symbol.as_str()) {
        return Market::Nasdaq;
    }

    Market::Nyse
}

fn is_crypto(symbol: &str) -> bool {
    if let Some((base, _quote)) = symbol.split_once(['-', '/']) {
        return CRYPTO_BASES.contains(&base);
    }

    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if CRYPTO_BASES.contains(&base) {
                return true;
            }
        }
    }

    CRYPTO_BASES.contains(&symbol)
}
