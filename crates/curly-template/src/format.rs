//! printf-style formatting for the `format` filter.
//!
//! Conversion specifications have the shape
//! `%[argnum$][flags][width][.precision]specifier`:
//!
//! | flag | effect |
//! |---|---|
//! | `-` | left-justify within the field width |
//! | `+` | prefix non-negative numbers with `+` |
//! | ` ` / `0` | pad with spaces / zeros |
//! | `'c` | pad with the character `c` |
//!
//! Specifiers: `b c d e E f F g G o s u x X` and `%%` for a literal percent.
//! Exponents are written with an explicit sign and no zero padding
//! (`1.5e+3`).

use curly_core::error::CurlyError;

use crate::context::Value;

/// Largest accepted field width or precision.
pub const MAX_FIELD: usize = 4096;

/// One parsed conversion specification.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Conversion {
    argnum: Option<usize>,
    left: bool,
    plus: bool,
    pad: char,
    width: usize,
    precision: Option<usize>,
    specifier: char,
}

/// Formats `args` according to the printf-style `format` string.
///
/// # Errors
///
/// Returns a `FilterError` when the format string references more arguments
/// than supplied, uses argument number `0`, asks for a width or precision
/// above [`MAX_FIELD`], or ends in an incomplete or unknown conversion.
///
/// # Examples
///
/// ```
/// use curly_template::context::Value;
/// use curly_template::format::sprintf;
///
/// let out = sprintf("%05.1f|%-4s|", &[Value::from(3.14159), Value::from("ab")]).unwrap();
/// assert_eq!(out, "003.1|ab  |");
/// ```
pub fn sprintf(format: &str, args: &[Value]) -> Result<String, CurlyError> {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len());
    let mut next_arg = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            out.push('%');
            i += 2;
            continue;
        }

        let (conversion, end) = parse_conversion(&chars, i + 1, format)?;
        i = end;

        let index = conversion.argnum.map_or_else(
            || {
                next_arg += 1;
                next_arg - 1
            },
            |n| n - 1,
        );
        let arg = args.get(index).ok_or_else(|| {
            CurlyError::FilterError(format!(
                "format '{format}' expects at least {} argument(s), {} given",
                index + 1,
                args.len()
            ))
        })?;
        out.push_str(&conversion.render(arg, format)?);
    }

    Ok(out)
}

/// Parses a conversion starting right after its `%`. Returns the conversion
/// and the index just past its specifier.
fn parse_conversion(
    chars: &[char],
    start: usize,
    format: &str,
) -> Result<(Conversion, usize), CurlyError> {
    let mut conversion = Conversion {
        argnum: None,
        left: false,
        plus: false,
        pad: ' ',
        width: 0,
        precision: None,
        specifier: '\0',
    };
    let mut i = start;

    let digits = count_digits(chars, i);
    if digits > 0 && chars.get(i + digits) == Some(&'$') {
        let n = parse_digits(&chars[i..i + digits]);
        if n == 0 {
            return Err(CurlyError::FilterError(format!(
                "format '{format}': argument number must be greater than zero"
            )));
        }
        conversion.argnum = Some(n);
        i += digits + 1;
    }

    loop {
        match chars.get(i) {
            Some('-') => conversion.left = true,
            Some('+') => conversion.plus = true,
            Some(' ') => conversion.pad = ' ',
            Some('0') => conversion.pad = '0',
            Some('\'') => {
                let Some(pad) = chars.get(i + 1) else {
                    break;
                };
                conversion.pad = *pad;
                i += 1;
            }
            _ => break,
        }
        i += 1;
    }

    let digits = count_digits(chars, i);
    conversion.width = field_size(&chars[i..i + digits], "width", format)?;
    i += digits;

    if chars.get(i) == Some(&'.') {
        let digits = count_digits(chars, i + 1);
        conversion.precision = Some(field_size(
            &chars[i + 1..i + 1 + digits],
            "precision",
            format,
        )?);
        i += digits + 1;
    }

    match chars.get(i) {
        Some(c) => {
            conversion.specifier = *c;
            Ok((conversion, i + 1))
        }
        None => Err(CurlyError::FilterError(format!(
            "format '{format}': missing conversion specifier"
        ))),
    }
}

fn count_digits(chars: &[char], from: usize) -> usize {
    chars
        .get(from..)
        .map_or(0, |rest| rest.iter().take_while(|c| c.is_ascii_digit()).count())
}

fn parse_digits(digits: &[char]) -> usize {
    digits.iter().fold(0usize, |acc, c| {
        acc.saturating_mul(10)
            .saturating_add(c.to_digit(10).unwrap_or(0) as usize)
    })
}

fn field_size(digits: &[char], what: &str, format: &str) -> Result<usize, CurlyError> {
    let n = parse_digits(digits);
    if n > MAX_FIELD {
        return Err(CurlyError::FilterError(format!(
            "format '{format}': {what} {n} exceeds {MAX_FIELD}"
        )));
    }
    Ok(n)
}

impl Conversion {
    #[allow(clippy::cast_sign_loss)]
    fn render(&self, arg: &Value, format: &str) -> Result<String, CurlyError> {
        let body = match self.specifier {
            's' => {
                let s = arg.to_display_string();
                match self.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                }
            }
            'd' => self.signed(arg.to_integer_lossy().to_string()),
            'u' => (arg.to_integer_lossy() as u64).to_string(),
            'f' | 'F' => {
                let precision = self.precision.unwrap_or(6);
                self.signed(format!("{:.*}", precision, arg.to_float_lossy()))
            }
            'e' | 'E' => {
                let precision = self.precision.unwrap_or(6);
                let s = exponential(arg.to_float_lossy(), precision, false);
                self.signed(self.apply_case(s))
            }
            'g' | 'G' => {
                let s = general(arg.to_float_lossy(), self.precision.unwrap_or(6));
                self.signed(self.apply_case(s))
            }
            'b' => format!("{:b}", arg.to_integer_lossy() as u64),
            'o' => format!("{:o}", arg.to_integer_lossy() as u64),
            'x' => format!("{:x}", arg.to_integer_lossy() as u64),
            'X' => format!("{:X}", arg.to_integer_lossy() as u64),
            'c' => {
                let code = u32::try_from(arg.to_integer_lossy() & 0xff).unwrap_or(0);
                return Ok(char::from_u32(code).map(String::from).unwrap_or_default());
            }
            other => {
                return Err(CurlyError::FilterError(format!(
                    "format '{format}': unknown conversion specifier '{other}'"
                )))
            }
        };
        Ok(self.pad(body))
    }

    fn signed(&self, s: String) -> String {
        if self.plus && !s.starts_with('-') {
            format!("+{s}")
        } else {
            s
        }
    }

    fn apply_case(&self, s: String) -> String {
        if self.specifier.is_ascii_uppercase() {
            s.to_uppercase()
        } else {
            s
        }
    }

    fn pad(&self, s: String) -> String {
        let len = s.chars().count();
        if len >= self.width {
            return s;
        }
        let fill: String = std::iter::repeat(self.pad).take(self.width - len).collect();
        let numeric = matches!(self.specifier, 'd' | 'e' | 'E' | 'f' | 'F' | 'g' | 'G');

        if self.left {
            s + &fill
        } else if numeric && self.pad == '0' && s.starts_with(['-', '+']) {
            let (sign, digits) = s.split_at(1);
            format!("{sign}{fill}{digits}")
        } else {
            fill + &s
        }
    }
}

/// Scientific notation with a signed, unpadded exponent: `1.500000e+3`.
fn exponential(value: f64, precision: usize, trim_zeros: bool) -> String {
    let raw = format!("{value:.precision$e}");
    let Some((mantissa, exponent)) = raw.split_once('e') else {
        return raw;
    };
    let mantissa = if trim_zeros {
        trim_fraction(mantissa)
    } else {
        mantissa.to_string()
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits}")
}

/// `%g`: fixed or scientific notation, whichever is shorter for the
/// precision, with trailing zeros removed.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn general(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let precision = precision.max(1);
    let exponent = format!("{value:.prec$e}", prec = precision - 1)
        .split_once('e')
        .and_then(|(_, e)| e.parse::<i64>().ok())
        .unwrap_or(0);

    if exponent >= -4 && exponent < precision as i64 {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}"))
    } else {
        exponential(value, precision - 1, true)
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}
