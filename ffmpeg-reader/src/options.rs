use std::collections::BTreeMap;

use ffmpeg_next::Dictionary;

/// String options handed to FFmpeg (demuxer, device or decoder private
/// options). Ordered so the same options always reach FFmpeg in the same
/// order; keys are validated by whichever FFmpeg component consumes them.
pub type OptionDict = BTreeMap<String, String>;

pub fn to_dictionary(options: &OptionDict) -> Dictionary<'static> {
    let mut dict = Dictionary::new();
    for (key, value) in options {
        dict.set(key, value);
    }
    dict
}

/// Parses `key=value` pairs, e.g. from command line flags.
pub fn parse_pairs<'a, I>(pairs: I) -> Result<OptionDict, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut options = OptionDict::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {:?}", pair))?;
        if key.is_empty() {
            return Err(format!("empty option key in {:?}", pair));
        }
        options.insert(key.to_string(), value.to_string());
    }
    Ok(options)
}
