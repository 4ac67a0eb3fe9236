//! SPICE netlist parser.
//!
//! Parses a subset of SPICE into the circuit IR.
//!
//! # Supported syntax
//!
//! ```text
//! * comment line (the first one is kept as the title)
//! + continuation of the previous line
//! Rname n+ n- value
//! Cname n+ n- value
//! Lname n+ n- value
//! Vname n+ n- [DC val] [AC mag [phase]] [SIN(..)|PULSE(..)|PWL(..)|EXP(..)]
//! Iname n+ n- (same as V)
//! .OP
//! .DC src start stop incr
//! .AC DEC|OCT|LIN np fstart fstop
//! .TRAN tstep tstop [tstart [tmax]] [UIC]
//! .NOISE ...
//! .STEP [LIN] src start stop incr
//! .END
//! ```
//!
//! Values support engineering suffixes: T, G, MEG, K, M, U, N, P, F
//! (case-insensitive). Trailing unit letters (`10kOhm`, `5V`) are ignored.

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while, take_while1};
use nom::character::complete::{char, space0, space1};
use nom::combinator::{map, opt};
use nom::number::complete::double;
use nom::sequence::delimited;
use nom::IResult;
use nom::Parser;

use crate::error::{OhmserveError, Result};
use crate::ir::{AcSweepType, Analysis, Circuit, Component, SourceSpec, SourceSweep, TransientFunc};

/// Parse a SPICE netlist string into a Circuit IR.
pub fn parse(input: &str) -> Result<Circuit> {
    let mut circuit = Circuit::default();

    for (line_num, line) in logical_lines(input) {
        let upper = line.to_uppercase();
        if upper == ".END" {
            break;
        }
        if let Some(comment) = line.strip_prefix('*') {
            if line_num == 0 {
                circuit.title = Some(comment.trim().to_string());
            }
            continue;
        }

        let err = |detail: String| {
            OhmserveError::Parse(format!("line {}: {} in: {}", line_num + 1, detail, line))
        };

        let Some(first) = line.chars().next() else {
            continue;
        };
        match first.to_ascii_uppercase() {
            'R' | 'C' | 'L' => circuit
                .components
                .push(parse_two_terminal(&line, first).map_err(err)?),
            'V' | 'I' => circuit
                .components
                .push(parse_source_line(&line, first).map_err(err)?),
            '.' => {
                if upper.starts_with(".STEP") {
                    circuit.step = Some(parse_step_command(&line).map_err(err)?);
                } else if let Some(analysis) = parse_dot_command(&line).map_err(err)? {
                    circuit.analyses.push(analysis);
                }
            }
            _ => return Err(err(format!("unknown element '{first}'"))),
        }
    }

    Ok(circuit)
}

/// Join `+` continuation lines onto their parent and drop blanks.
/// Yields (zero-based line number of the first physical line, text).
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (line_num, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('+') {
            if let Some((_, prev)) = lines.last_mut() {
                prev.push(' ');
                prev.push_str(rest.trim());
                continue;
            }
        }
        lines.push((line_num, line.to_string()));
    }
    lines
}

// ---------------------------------------------------------------------------
// Values and tokens
// ---------------------------------------------------------------------------

/// Numeric value with optional engineering suffix and trailing unit letters.
fn eng_value(input: &str) -> IResult<&str, f64> {
    let (rest, num) = double(input)?;
    let (rest, multiplier) = opt(eng_suffix).parse(rest)?;
    let (rest, _unit) = take_while(|c: char| c.is_ascii_alphabetic())(rest)?;
    Ok((rest, num * multiplier.unwrap_or(1.0)))
}

fn eng_suffix(input: &str) -> IResult<&str, f64> {
    // MEG before M
    alt((
        map(tag_no_case("MEG"), |_: &str| 1e6),
        map(tag_no_case("T"), |_: &str| 1e12),
        map(tag_no_case("G"), |_: &str| 1e9),
        map(tag_no_case("K"), |_: &str| 1e3),
        map(tag_no_case("M"), |_: &str| 1e-3),
        map(tag_no_case("U"), |_: &str| 1e-6),
        map(tag_no_case("N"), |_: &str| 1e-9),
        map(tag_no_case("P"), |_: &str| 1e-12),
        map(tag_no_case("F"), |_: &str| 1e-15),
    ))
    .parse(input)
}

fn node_id(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn element_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

/// Parse a whole token as a value, failing on leftovers.
fn value_token(token: &str) -> std::result::Result<f64, String> {
    match eng_value(token) {
        Ok(("", v)) => Ok(v),
        _ => Err(format!("invalid value '{token}'")),
    }
}

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// Rname n+ n- value (likewise C, L)
fn parse_two_terminal(line: &str, kind: char) -> std::result::Result<Component, String> {
    let (rest, (name, _, n_plus, _, n_minus, _, value)) = (
        element_name,
        space1,
        node_id,
        space1,
        node_id,
        space1,
        eng_value,
    )
        .parse(line)
        .map_err(|_| format!("failed to parse {} element", kind.to_ascii_uppercase()))?;
    if !rest.trim().is_empty() {
        return Err(format!("unexpected trailing input '{}'", rest.trim()));
    }

    let name = name.to_string();
    let nodes = (n_plus.to_string(), n_minus.to_string());
    if value <= 0.0 && kind.to_ascii_uppercase() != 'C' {
        return Err(format!("{name} must have a positive value"));
    }

    Ok(match kind.to_ascii_uppercase() {
        'R' => Component::Resistor { name, nodes, value },
        'C' => Component::Capacitor { name, nodes, value },
        _ => Component::Inductor { name, nodes, value },
    })
}

/// Vname/Iname n+ n- followed by any mix of DC, AC and one transient function.
fn parse_source_line(line: &str, kind: char) -> std::result::Result<Component, String> {
    let (rest, (name, _, n_plus, _, n_minus, _)) =
        (element_name, space1, node_id, space1, node_id, space0)
            .parse(line)
            .map_err(|_| "failed to parse source name/nodes".to_string())?;

    let spec = parse_source_spec(rest.trim())?;
    let name = name.to_string();
    let nodes = (n_plus.to_string(), n_minus.to_string());

    Ok(if kind.to_ascii_uppercase() == 'V' {
        Component::VSource { name, nodes, spec }
    } else {
        Component::ISource { name, nodes, spec }
    })
}

fn parse_source_spec(input: &str) -> std::result::Result<SourceSpec, String> {
    let mut spec = SourceSpec::default();
    let mut rest = input.trim_start();

    while !rest.is_empty() {
        let word_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let keyword = rest[..word_len].to_uppercase();
        let after = rest[word_len..].trim_start();

        rest = match keyword.as_str() {
            "DC" => {
                let (r, v) = eng_value(after).map_err(|_| "failed to parse DC value".to_string())?;
                spec.dc = Some(v);
                r
            }
            "AC" => {
                let (r, mag) =
                    eng_value(after).map_err(|_| "failed to parse AC magnitude".to_string())?;
                let r = r.trim_start();
                let (r, phase) = match eng_value(r) {
                    Ok((r, p)) => (r, p),
                    Err(_) => (r, 0.0),
                };
                spec.ac = Some((mag, phase));
                r
            }
            "SIN" | "PULSE" | "PWL" | "EXP" => {
                let (r, args) = paren_args(after)?;
                if spec.tran.is_some() {
                    return Err("more than one transient function".to_string());
                }
                spec.tran = Some(transient_func(&keyword, &args)?);
                r
            }
            "" if spec.dc.is_none() => {
                // Bare leading number is the DC value
                let (r, v) = eng_value(rest).map_err(|_| format!("unexpected '{rest}'"))?;
                spec.dc = Some(v);
                r
            }
            _ => return Err(format!("unexpected source parameter '{rest}'")),
        }
        .trim_start();
    }

    Ok(spec)
}

/// `( a b, c ... )` into parsed values.
fn paren_args(input: &str) -> std::result::Result<(&str, Vec<f64>), String> {
    let (rest, inner) = delimited(char('('), take_while(|c: char| c != ')'), char(')'))
        .parse(input)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| "expected '(...)'".to_string())?;
    let args = inner
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(value_token)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((rest, args))
}

fn transient_func(keyword: &str, args: &[f64]) -> std::result::Result<TransientFunc, String> {
    let arg = |i: usize, default: f64| args.get(i).copied().unwrap_or(default);
    let need = |n: usize| {
        if args.len() < n {
            Err(format!("{keyword} needs at least {n} arguments, got {}", args.len()))
        } else {
            Ok(())
        }
    };

    match keyword {
        "SIN" => {
            need(3)?;
            Ok(TransientFunc::Sin {
                vo: args[0],
                va: args[1],
                freq: args[2],
                td: arg(3, 0.0),
                theta: arg(4, 0.0),
            })
        }
        "PULSE" => {
            need(2)?;
            Ok(TransientFunc::Pulse {
                v1: args[0],
                v2: args[1],
                td: arg(2, 0.0),
                tr: arg(3, 0.0),
                tf: arg(4, 0.0),
                pw: arg(5, f64::INFINITY),
                per: arg(6, 0.0),
            })
        }
        "PWL" => {
            if args.is_empty() || args.len() % 2 != 0 {
                return Err("PWL needs time/value pairs".to_string());
            }
            let points: Vec<(f64, f64)> = args.chunks(2).map(|p| (p[0], p[1])).collect();
            if points.windows(2).any(|w| w[1].0 < w[0].0) {
                return Err("PWL times must be non-decreasing".to_string());
            }
            Ok(TransientFunc::Pwl { points })
        }
        _ => {
            need(2)?;
            Ok(TransientFunc::Exp {
                v1: args[0],
                v2: args[1],
                td1: arg(2, 0.0),
                tau1: arg(3, 1.0),
                td2: arg(4, f64::INFINITY),
                tau2: arg(5, 1.0),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Dot commands
// ---------------------------------------------------------------------------

/// Returns None for dot commands that carry no analysis (.PRINT, .OPTIONS, ...).
fn parse_dot_command(line: &str) -> std::result::Result<Option<Analysis>, String> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().unwrap_or_default().to_uppercase();
    let args: Vec<&str> = tokens.collect();

    match command.as_str() {
        ".OP" => Ok(Some(Analysis::Op)),
        ".DC" if args.is_empty() => Ok(Some(Analysis::Op)),
        ".DC" => Ok(Some(Analysis::Dc(source_sweep(&args, ".DC")?))),
        ".AC" => parse_ac_args(&args).map(Some),
        ".TRAN" => parse_tran_args(&args).map(Some),
        ".NOISE" => Ok(Some(Analysis::Noise {
            args: args.join(" "),
        })),
        _ => Ok(None),
    }
}

fn parse_step_command(line: &str) -> std::result::Result<SourceSweep, String> {
    let mut args: Vec<&str> = line.split_whitespace().skip(1).collect();
    if args.first().is_some_and(|a| a.eq_ignore_ascii_case("LIN")) {
        args.remove(0);
    }
    source_sweep(&args, ".STEP")
}

fn source_sweep(args: &[&str], command: &str) -> std::result::Result<SourceSweep, String> {
    let [source, start, stop, incr] = args else {
        return Err(format!("{command} expects: source start stop increment"));
    };
    Ok(SourceSweep {
        source: source.to_string(),
        start: value_token(start)?,
        stop: value_token(stop)?,
        incr: value_token(incr)?,
    })
}

fn parse_ac_args(args: &[&str]) -> std::result::Result<Analysis, String> {
    let [sweep, n_points, f_start, f_stop] = args else {
        return Err(".AC expects: DEC|OCT|LIN points fstart fstop".to_string());
    };
    let sweep_type = match sweep.to_uppercase().as_str() {
        "DEC" => AcSweepType::Dec,
        "OCT" => AcSweepType::Oct,
        "LIN" => AcSweepType::Lin,
        other => return Err(format!("expected DEC, OCT, or LIN, got '{other}'")),
    };
    let n_points: usize = n_points
        .parse()
        .map_err(|_| format!("invalid point count '{n_points}'"))?;
    let (f_start, f_stop) = (value_token(f_start)?, value_token(f_stop)?);
    if n_points == 0 || f_start <= 0.0 || f_stop < f_start {
        return Err("AC sweep needs points > 0 and 0 < fstart <= fstop".to_string());
    }
    Ok(Analysis::Ac {
        sweep_type,
        n_points,
        f_start,
        f_stop,
    })
}

fn parse_tran_args(args: &[&str]) -> std::result::Result<Analysis, String> {
    let uic = args.last().is_some_and(|a| a.eq_ignore_ascii_case("UIC"));
    let values = if uic { &args[..args.len() - 1] } else { args };
    if !(2..=4).contains(&values.len()) {
        return Err(".TRAN expects: tstep tstop [tstart [tmax]] [UIC]".to_string());
    }
    let tstep = value_token(values[0])?;
    let tstop = value_token(values[1])?;
    let tstart = values.get(2).map(|v| value_token(v)).transpose()?.unwrap_or(0.0);
    if tstep <= 0.0 || tstop <= 0.0 || tstart < 0.0 || tstart > tstop {
        return Err("TRAN needs tstep > 0, tstop > 0 and 0 <= tstart <= tstop".to_string());
    }
    Ok(Analysis::Tran {
        tstep,
        tstop,
        tstart,
        uic,
    })
}
