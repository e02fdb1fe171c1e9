#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kw {
    Struct,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Eof,

    // literals
    Ident(String),
    Int(u64),

    Kw(Kw),

    // punctuation
    Colon,
    Comma,
    Semi,
    Star,
    LBrace,
    RBrace,
    LBrack,
    RBrack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub file_id: usize,
    pub line: usize, // 1-based
    pub col: usize,  // 1-based (byte index in line + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub span: Span,
}

#[derive(Debug)]
pub struct LexError {
    pub span: Span,
    pub msg: String,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.span.line, self.span.col, self.msg)
    }
}
impl std::error::Error for LexError {}

fn err(file_id: usize, line: usize, col: usize, msg: impl Into<String>) -> LexError {
    LexError {
        span: Span { file_id, line, col },
        msg: msg.into(),
    }
}

fn keyword_of(s: &str) -> Option<Kw> {
    match s {
        "struct" => Some(Kw::Struct),
        _ => None,
    }
}

pub fn lex_str(src: &str, file_id: usize) -> Result<Vec<Token>, LexError> {
    let mut out: Vec<Token> = Vec::new();
    let mut last_line = 1usize;

    for (li0, raw_line) in src.split('\n').enumerate() {
        let line_no = li0 + 1;
        last_line = line_no;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        let bytes = line.as_bytes();

        let mut i = 0usize;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b' ' || c == b'\t' {
                i += 1;
                continue;
            }
            if c == b'#' {
                break;
            }

            let col = i + 1;
            let span = Span {
                file_id,
                line: line_no,
                col,
            };

            if c.is_ascii_digit() {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
                    i += 1;
                }
                let text: String = line[start..i].chars().filter(|c| *c != '_').collect();
                let v: u64 = text
                    .parse()
                    .map_err(|_| err(file_id, line_no, col, "invalid integer literal"))?;
                out.push(Token {
                    kind: TokKind::Int(v),
                    span,
                });
                continue;
            }

            if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let text = &line[start..i];
                let kind = match keyword_of(text) {
                    Some(k) => TokKind::Kw(k),
                    None => TokKind::Ident(text.to_string()),
                };
                out.push(Token { kind, span });
                continue;
            }

            let kind = match c {
                b':' => TokKind::Colon,
                b',' => TokKind::Comma,
                b';' => TokKind::Semi,
                b'*' => TokKind::Star,
                b'{' => TokKind::LBrace,
                b'}' => TokKind::RBrace,
                b'[' => TokKind::LBrack,
                b']' => TokKind::RBrack,
                _ => {
                    let ch = line[i..].chars().next().unwrap_or('?');
                    return Err(err(
                        file_id,
                        line_no,
                        col,
                        format!("unexpected character: {ch:?}"),
                    ));
                }
            };
            out.push(Token { kind, span });
            i += 1;
        }
    }

    out.push(Token {
        kind: TokKind::Eof,
        span: Span {
            file_id,
            line: last_line,
            col: 1,
        },
    });
    Ok(out)
}
