//! Field scanner and name normalisation for perfdata strings.

/// One `label=value` field as written by the plugin, quotes removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField<'a> {
    pub label: String,
    /// Everything after `=` up to the next whitespace.
    pub value: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// Between fields, skipping whitespace.
    Between,
    /// Inside an apostrophe-quoted label.
    Quoted,
    /// Inside an unquoted label, or the tail following a closing quote.
    Label,
    /// After `=`, until whitespace.
    Value,
    /// Inside a field that cannot be completed; skip to whitespace.
    Skip,
}

/// Split a perfdata string into fields.
///
/// Fields without `=` and quoted labels that are never closed are dropped.
pub fn tokenize(input: &str) -> Vec<RawField<'_>> {
    let mut fields = Vec::new();
    let mut scan = Scan::Between;
    let mut label = String::new();
    let mut value_start = 0;
    let mut chars = input.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match scan {
            Scan::Between => {
                if ch.is_whitespace() {
                    continue;
                }
                label.clear();
                scan = match ch {
                    '\'' => Scan::Quoted,
                    '=' => Scan::Skip,
                    _ => {
                        label.push(ch);
                        Scan::Label
                    }
                };
            }
            Scan::Quoted => {
                if ch == '\'' {
                    // `''` is an escaped apostrophe
                    if matches!(chars.peek(), Some((_, '\''))) {
                        chars.next();
                        label.push('\'');
                    } else {
                        scan = Scan::Label;
                    }
                } else {
                    label.push(ch);
                }
            }
            Scan::Label => {
                if ch == '=' {
                    value_start = pos + ch.len_utf8();
                    scan = Scan::Value;
                } else if ch.is_whitespace() {
                    scan = Scan::Between;
                } else {
                    label.push(ch);
                }
            }
            Scan::Value => {
                if ch.is_whitespace() {
                    fields.push(RawField {
                        label: std::mem::take(&mut label),
                        value: &input[value_start..pos],
                    });
                    scan = Scan::Between;
                }
            }
            Scan::Skip => {
                if ch.is_whitespace() {
                    scan = Scan::Between;
                }
            }
        }
    }

    if scan == Scan::Value {
        fields.push(RawField {
            label,
            value: &input[value_start..],
        });
    }

    fields
}

/// Rewrite a plugin label into a metric name.
///
/// A composite `name.<digits>'` label loses its `.<digits>` suffix, `%`
/// becomes `_pct`, any other character that is not alphanumeric or `_`
/// becomes `_`, runs of `_` collapse and the result is trimmed of `_`.
pub fn normalize_name(label: &str) -> String {
    let mut base = label;
    if let Some(composite) = label.strip_suffix('\'') {
        base = composite;
        if let Some(pos) = composite.rfind('.') {
            let suffix = &composite[pos + 1..];
            if pos > 0 && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                base = &composite[..pos];
            }
        }
    }
    let base = base.trim_matches('\'');

    let mut name = String::with_capacity(base.len() + 4);
    for ch in base.chars() {
        match ch {
            '%' => {
                if !name.ends_with('_') {
                    name.push('_');
                }
                name.push_str("pct");
            }
            c if c.is_alphanumeric() => name.push(c),
            _ => {
                if !name.ends_with('_') {
                    name.push('_');
                }
            }
        }
    }

    name.trim_matches('_').to_string()
}
