//! Balancing of Telegram's legacy inline markup.
//!
//! A streamed reply is flushed many times before it is complete, so most
//! intermediate snapshots end in the middle of a code span or an emphasis
//! run. Telegram rejects such text in Markdown mode. [`repair_markup`] closes
//! the one tag that can be open at the end of the text.

/// Longest suffix [`repair_markup`] ever appends.
pub const MAX_CLOSING_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    CodeBlock,
    Code,
    Bold,
    Italic,
}

impl Tag {
    fn marker(self) -> &'static [char] {
        match self {
            Tag::CodeBlock => &['`', '`', '`'],
            Tag::Code => &['`'],
            Tag::Bold => &['*'],
            Tag::Italic => &['_'],
        }
    }
}

// Opening priority: a code block wins over an inline code span.
const OPENERS: [Tag; 4] = [Tag::CodeBlock, Tag::Code, Tag::Bold, Tag::Italic];

fn starts_with(chars: &[char], at: usize, marker: &[char]) -> bool {
    chars.get(at..at + marker.len()) == Some(marker)
}

/// Close a tag left open at the end of `text`.
///
/// The scan runs left to right with at most one open tag. Inside a tag only
/// its own closing marker is recognised. A backslash makes the following
/// character literal. Balanced text is returned unchanged, so
/// `repair_markup(&repair_markup(t)) == repair_markup(t)`.
pub fn repair_markup(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut open: Option<Tag> = None;
    let mut dangling_escape = false;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '\\' {
            if i + 1 == chars.len() {
                dangling_escape = true;
            }
            i += 2;
            continue;
        }

        match open {
            Some(tag) => {
                if starts_with(&chars, i, tag.marker()) {
                    i += tag.marker().len();
                    open = None;
                } else {
                    i += 1;
                }
            }
            None => match OPENERS
                .iter()
                .find(|tag| starts_with(&chars, i, tag.marker()))
            {
                Some(tag) => {
                    i += tag.marker().len();
                    open = Some(*tag);
                }
                None => i += 1,
            },
        }
    }

    let Some(tag) = open else {
        return text.to_string();
    };

    let mut repaired = String::with_capacity(text.len() + MAX_CLOSING_LEN);
    repaired.push_str(text);
    match tag {
        Tag::CodeBlock => {
            // The newline also absorbs a dangling backslash.
            if !text.ends_with('\n') {
                repaired.push('\n');
            }
            repaired.push_str("```");
        }
        Tag::Code | Tag::Bold | Tag::Italic => {
            if dangling_escape {
                repaired.push('\\');
            }
            repaired.extend(tag.marker());
        }
    }
    repaired
}
