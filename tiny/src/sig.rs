//! Foreign function signature parsing.
//!
//! The binding grammar is `name(T[,T]*[,...])[:R]`: an identifier, a
//! parenthesized list of type names optionally ending in the literal `...`
//! for varargs, and an optional `: R` return type that defaults to `void`.

/// A parsed binding signature. Type names are resolved against the symbol
/// table by the caller.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Signature {
    pub name: String,
    pub args: Vec<String>,
    pub varargs: bool,
    pub ret: Option<String>,
}

/// Parse a binding signature, or describe why it is malformed.
pub(crate) fn parse_signature(sig: &str) -> Result<Signature, String> {
    let mut parser = SigParser {
        bytes: sig.as_bytes(),
        pos: 0,
    };

    let name = parser.ident().ok_or("expected function name")?;

    parser.skip_ws();
    if !parser.eat(b'(') {
        return Err("expected '(' after function name".to_string());
    }

    let mut args = Vec::new();
    let mut varargs = false;

    parser.skip_ws();
    if !parser.eat(b')') {
        loop {
            parser.skip_ws();

            if parser.eat_str("...") {
                varargs = true;
                parser.skip_ws();
                if !parser.eat(b')') {
                    return Err("expected ')' after '...'".to_string());
                }
                break;
            }

            let arg = parser.ident().ok_or("expected type name in argument list")?;
            args.push(arg);

            parser.skip_ws();
            if parser.eat(b',') {
                continue;
            }
            if parser.eat(b')') {
                break;
            }

            return Err("expected ',' or ')' in argument list".to_string());
        }
    }

    parser.skip_ws();
    let ret = if parser.eat(b':') {
        parser.skip_ws();
        Some(parser.ident().ok_or("expected return type after ':'")?)
    } else {
        None
    };

    parser.skip_ws();
    if parser.pos != parser.bytes.len() {
        return Err("unexpected trailing characters in signature".to_string());
    }

    Ok(Signature {
        name,
        args,
        varargs,
        ret,
    })
}

struct SigParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl SigParser<'_> {
    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.bytes.get(self.pos) == Some(&byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.bytes[self.pos..].starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<String> {
        self.skip_ws();

        let start = self.pos;
        if !self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
        {
            return None;
        }

        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
        {
            self.pos += 1;
        }

        String::from_utf8(self.bytes[start..self.pos].to_vec()).ok()
    }
}
