//! Results output formatting (CSV).

use crate::error::Result;
use crate::stream::{ResultBatch, Series, StepData};
use std::io::Write;

/// Write one polled batch as wide CSV.
///
/// Format:
/// ```csv
/// step,TIME,V(1)
/// tran0,0,5
/// tran0,0.000001,4.98
/// ```
///
/// Complex fields take two columns, `<field>_re,<field>_im`. Steps carrying
/// no samples are skipped. The header is written only when `header` is set
/// and the batch has data; returns whether a header was written.
pub fn write_batch_csv<W: Write>(batch: &ResultBatch, writer: &mut W, header: bool) -> Result<bool> {
    let mut wrote_header = false;
    for step in batch.steps.iter().filter(|s| step_len(s) > 0) {
        if header && !wrote_header {
            write_header(step, writer)?;
            wrote_header = true;
        }
        for row in 0..step_len(step) {
            write!(writer, "{}", step.name)?;
            for field in &step.fields {
                match &field.series {
                    Series::Real(v) => write!(writer, ",{}", v[row])?,
                    Series::Complex(v) => write!(writer, ",{},{}", v[row].re, v[row].im)?,
                }
            }
            writeln!(writer)?;
        }
    }
    Ok(wrote_header)
}

fn write_header<W: Write>(step: &StepData, writer: &mut W) -> Result<()> {
    write!(writer, "step")?;
    for field in &step.fields {
        match field.series {
            Series::Real(_) => write!(writer, ",{}", field.name)?,
            Series::Complex(_) => write!(writer, ",{0}_re,{0}_im", field.name)?,
        }
    }
    writeln!(writer)?;
    Ok(())
}

/// Rows in a step: every field of a sample is appended together, so the
/// shortest series bounds what can be printed.
fn step_len(step: &StepData) -> usize {
    step.fields.iter().map(|f| f.series.len()).min().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FieldData;
    use num_complex::Complex64;

    fn render(batch: &ResultBatch, header: bool) -> String {
        let mut out = Vec::new();
        write_batch_csv(batch, &mut out, header).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn real_batch_with_header() {
        let batch = ResultBatch {
            more: true,
            scale: Some("TIME".into()),
            steps: vec![StepData {
                name: "tran0".into(),
                fields: vec![
                    FieldData {
                        name: "TIME".into(),
                        series: Series::Real(vec![0.0, 0.5]),
                    },
                    FieldData {
                        name: "V(1)".into(),
                        series: Series::Real(vec![5.0, 4.5]),
                    },
                ],
            }],
        };
        assert_eq!(render(&batch, true), "step,TIME,V(1)\ntran0,0,5\ntran0,0.5,4.5\n");
        assert_eq!(render(&batch, false), "tran0,0,5\ntran0,0.5,4.5\n");
    }

    #[test]
    fn complex_fields_split_into_two_columns() {
        let batch = ResultBatch {
            more: false,
            scale: Some("FREQ".into()),
            steps: vec![StepData {
                name: "ac0".into(),
                fields: vec![
                    FieldData {
                        name: "FREQ".into(),
                        series: Series::Complex(vec![Complex64::new(10.0, 0.0)]),
                    },
                    FieldData {
                        name: "V(2)".into(),
                        series: Series::Complex(vec![Complex64::new(0.5, -0.5)]),
                    },
                ],
            }],
        };
        assert_eq!(
            render(&batch, true),
            "step,FREQ_re,FREQ_im,V(2)_re,V(2)_im\nac0,10,0,0.5,-0.5\n"
        );
    }

    #[test]
    fn empty_steps_are_skipped() {
        let batch = ResultBatch {
            more: true,
            scale: Some("V1".into()),
            steps: vec![
                StepData {
                    name: "dc0".into(),
                    fields: vec![FieldData {
                        name: "V1".into(),
                        series: Series::Real(vec![]),
                    }],
                },
                StepData {
                    name: "dc1".into(),
                    fields: vec![FieldData {
                        name: "V1".into(),
                        series: Series::Real(vec![2.0]),
                    }],
                },
            ],
        };
        assert_eq!(render(&batch, true), "step,V1\ndc1,2\n");
        assert_eq!(render(&ResultBatch::empty(true), true), "");
    }
}
