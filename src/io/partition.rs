//! Hive-style `Symbol=<value>` directory names.

use crate::feature::FeatureColumn;

/// Directory name for one symbol partition.
pub fn directory_name(symbol: &str) -> String {
    format!("{}={}", FeatureColumn::Symbol.name(), escape(symbol))
}

/// Symbol encoded in a partition directory name, if it is one.
pub fn symbol_from_directory(name: &str) -> Option<String> {
    let (key, value) = name.split_once('=')?;
    if key != FeatureColumn::Symbol.name() {
        return None;
    }
    unescape(value)
}

pub fn escape(value: &str) -> String {
    let encoded = urlencoding::encode(value);
    // A leading dot would hide the partition from readers that skip dotfiles.
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{rest}"),
        None => encoded.into_owned(),
    }
}

pub fn unescape(value: &str) -> Option<String> {
    urlencoding::decode(value).ok().map(|decoded| decoded.into_owned())
}
