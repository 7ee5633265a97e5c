//! Plain-text extraction from RTF.
//!
//! Only as much of RTF as the conversion sanity check needs: control words
//! are dropped, destination groups (font tables, stylesheets, pictures,
//! `\*` extensions) are skipped entirely, and `\par`, `\tab`, `\'hh` and
//! `\uN` produce text.

/// Destinations whose content is never visible text.
const SKIPPED_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "header",
    "footer",
    "headerl",
    "headerr",
    "footerl",
    "footerr",
    "listtable",
    "listoverridetable",
    "rsidtbl",
    "generator",
    "xmlnstbl",
    "themedata",
    "colorschememapping",
    "latentstyles",
    "datastore",
    "object",
    "fldinst",
];

/// Visible text of an RTF document.
pub fn plain_text(rtf: &str) -> String {
    let chars: Vec<char> = rtf.chars().collect();
    let mut out = String::new();
    // One entry per open group: the enclosing skip flag and `\uc` value.
    let mut stack: Vec<(bool, usize)> = Vec::new();
    let mut skipping = false;
    // Characters to drop after a \uN (the ANSI substitute). RTF default is 1.
    let mut uc_skip = 1usize;
    let mut pending_skip = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' => {
                stack.push((skipping, uc_skip));
                pending_skip = 0;
                i += 1;
            }
            '}' => {
                (skipping, uc_skip) = stack.pop().unwrap_or((false, 1));
                pending_skip = 0;
                i += 1;
            }
            '\\' => {
                i += 1;
                let Some(&next) = chars.get(i) else { break };

                if next == '\'' {
                    let hex: String = chars.iter().skip(i + 1).take(2).collect();
                    i += 1 + hex.len();
                    if pending_skip > 0 {
                        pending_skip -= 1;
                    } else if !skipping {
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            out.push(char::from(byte));
                        }
                    }
                    continue;
                }

                if !next.is_ascii_alphabetic() {
                    // Control symbol.
                    i += 1;
                    match next {
                        '*' => skipping = true,
                        '~' if !skipping => out.push(' '),
                        '\\' | '{' | '}' if !skipping => out.push(next),
                        '\n' | '\r' if !skipping => out.push('\n'),
                        _ => {}
                    }
                    continue;
                }

                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let num_start = i;
                if i < chars.len() && (chars[i] == '-' || chars[i].is_ascii_digit()) {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let param: Option<i64> = chars[num_start..i].iter().collect::<String>().parse().ok();
                if chars.get(i) == Some(&' ') {
                    i += 1;
                }

                if SKIPPED_DESTINATIONS.contains(&word.as_str()) {
                    skipping = true;
                    continue;
                }
                if skipping {
                    continue;
                }
                match word.as_str() {
                    "par" | "line" | "sect" | "page" | "row" => out.push('\n'),
                    "tab" | "cell" => out.push('\t'),
                    "uc" => uc_skip = param.unwrap_or(1).max(0) as usize,
                    "u" => {
                        if let Some(code) = param {
                            let code = if code < 0 { code + 65_536 } else { code };
                            if let Some(ch) = u32::try_from(code).ok().and_then(char::from_u32) {
                                out.push(ch);
                            }
                            pending_skip = uc_skip;
                        }
                    }
                    "emdash" => out.push('\u{2014}'),
                    "endash" => out.push('\u{2013}'),
                    "bullet" => out.push('\u{2022}'),
                    "lquote" => out.push('\u{2018}'),
                    "rquote" => out.push('\u{2019}'),
                    "ldblquote" => out.push('\u{201C}'),
                    "rdblquote" => out.push('\u{201D}'),
                    _ => {}
                }
            }
            '\r' | '\n' => i += 1,
            _ => {
                i += 1;
                if pending_skip > 0 {
                    pending_skip -= 1;
                } else if !skipping {
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Number of non-whitespace characters of visible text.
pub fn plain_text_len(rtf: &str) -> usize {
    plain_text(rtf).chars().filter(|c| !c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"{\rtf1\ansi\deff0{\fonttbl{\f0\fswiss Helvetica;}}{\colortbl;\red255\green0\blue0;}
{\*\generator Pandoc;}
{\pard \ql \f0 Hello\tab World\par}
{\pard \b Caf\'e9\b0  na\u239?ve\par}
}";

    #[test]
    fn extracts_visible_text() {
        let text = plain_text(SAMPLE);
        assert!(text.contains("Hello\tWorld\n"), "got: {text:?}");
        assert!(text.contains("Café naïve"), "got: {text:?}");
        assert!(!text.contains("Helvetica"));
        assert!(!text.contains("Pandoc"));
    }

    #[test]
    fn counts_non_whitespace() {
        assert_eq!(plain_text_len(r"{\rtf1 a b\par c}"), 3);
        assert_eq!(plain_text_len(r"{\rtf1{\fonttbl{\f0 Times;}}}"), 0);
    }

    #[test]
    fn escaped_braces_and_backslash() {
        assert_eq!(plain_text(r"{\rtf1 \{x\}\\}"), "{x}\\");
    }

    #[test]
    fn negative_unicode_values_wrap() {
        // \u-3913 is U+F0B7 in the signed 16-bit convention.
        assert_eq!(plain_text(r"{\rtf1\uc1\u-3913?}"), "\u{F0B7}");
    }

    #[test]
    fn uc0_drops_no_substitute() {
        assert_eq!(plain_text(r"{\rtf1\uc0\u233 x}"), "éx");
    }

    #[test]
    fn uc_is_restored_when_group_closes() {
        assert_eq!(plain_text(r"{\rtf1{\uc2\u233 ??}\u233?y}"), "ééy");
        assert_eq!(plain_text(r"{\rtf1{\uc0 a}\u233?b}"), "aéb");
    }

    #[test]
    fn empty_input() {
        assert_eq!(plain_text(""), "");
        assert_eq!(plain_text_len("{}"), 0);
    }
}
