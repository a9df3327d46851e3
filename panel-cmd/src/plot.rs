use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{bail, Context, Result};
use handlebars::Handlebars;
use panel::packet::Record;
use serde::Serialize;
use tracing::debug;

/// Plots records using a background gnuplot process.
///
/// gnuplot has fewer features than most plotting libraries but works well as a
/// long-lived background window fed over stdin.
pub struct Plotter {
    child: Child,
    // Taken on drop so gnuplot sees end of input
    stdin: Option<ChildStdin>,
    hb: Handlebars<'static>,
    plots: usize,
    persist: bool,
}

#[derive(Serialize)]
struct PlotContext {
    title: &'static str,
    time_str: String,
    trigger_sample: usize,
    point_freq: String,
    point_freq_label: String,
    data_len: usize,
    v_scale: String,
    adc_offset: i8,
    threshold: u8,
}

fn handlebars() -> Result<Handlebars<'static>> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_template_string("plot", PLOT_TEMPLATE)
        .context("registering plot template")?;
    Ok(hb)
}

/// Render the gnuplot commands, including inline data, for `rec`.
fn script(hb: &Handlebars, rec: &Record) -> Result<String> {
    let ctx = PlotContext {
        title: if rec.triggered { "Trigger" } else { "Idle" },
        time_str: rec.captured_at.local.clone(),
        trigger_sample: rec.trigger_sample_index.unwrap_or(0),
        point_freq: format!("{:.6}", rec.sample_rate_hz),
        point_freq_label: format!("{:.1}", rec.sample_rate_hz),
        data_len: rec.sample_count(),
        v_scale: format!("{:.6}", rec.voltage_scale),
        adc_offset: rec.adc_offset,
        threshold: rec.threshold,
    };
    let mut out = hb.render("plot", &ctx).context("rendering plot")?;
    for (idx, val) in rec.samples.iter().enumerate() {
        out.push_str(&format!("{idx} {val}\n"));
    }
    out.push_str("e\n");
    Ok(out)
}

impl Plotter {
    /// Start gnuplot. With `persist` the plot window outlives this process.
    pub fn spawn(persist: bool) -> Result<Self> {
        let mut cmd = Command::new("gnuplot");
        if persist {
            cmd.arg("-persist");
        }
        Self::start(cmd, persist)
    }

    fn start(mut cmd: Command, persist: bool) -> Result<Self> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .spawn()
            .context("starting gnuplot")?;
        let Some(mut stdin) = child.stdin.take() else {
            bail!("gnuplot stdin not available");
        };
        writeln!(stdin, "set term wxt noraise title \"panel_plot\"")
            .context("writing to gnuplot")?;
        debug!(pid = child.id(), persist, "started gnuplot");

        Ok(Plotter {
            child,
            stdin: Some(stdin),
            hb: handlebars()?,
            plots: 0,
            persist,
        })
    }

    /// Fails if gnuplot has exited, e.g., because its window was closed.
    pub fn poll(&mut self) -> Result<()> {
        if let Some(status) = self.child.try_wait().context("polling gnuplot")? {
            bail!("gnuplot terminated with {status}");
        }
        Ok(())
    }

    pub fn plot(&mut self, rec: &Record) -> Result<()> {
        self.poll()?;
        let script = script(&self.hb, rec)?;
        let Some(stdin) = self.stdin.as_mut() else {
            bail!("gnuplot input closed");
        };
        stdin
            .write_all(script.as_bytes())
            .context("writing to gnuplot")?;
        self.plots += 1;
        if self.plots == 1 {
            // bring the window to the foreground once
            writeln!(stdin, "raise").context("writing to gnuplot")?;
        }
        stdin.flush().context("writing to gnuplot")
    }
}

impl Drop for Plotter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if self.persist {
            // gnuplot keeps the window up on its own after end of input
            debug!(pid = self.child.id(), "leaving gnuplot running");
            return;
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

const PLOT_TEMPLATE: &str = r#"
xtime(x)=(x - {{ trigger_sample }}) / {{ point_freq }} * 1000.0

set grid xtics ytics
set xlabel 'Time, milliseconds (freq {{ point_freq_label }}Hz)'
set xrange [xtime(0):xtime({{ data_len }} + 1)]

yvolt(y) = y * {{ v_scale }}

set yrange [-128:128]
set ylabel 'Input, ADC ticks (offset {{ adc_offset }})'

set y2range [yvolt(-128):yvolt(128)]
set y2label 'Input, Volts'
set y2tics

set title '{{ title }} on {{ time_str }}'

set arrow 1 from xtime(0),{{ threshold }} to xtime({{ data_len }} + 1),{{ threshold }} nohead
set arrow 2 from xtime(0),-{{ threshold }} to xtime({{ data_len }} + 1),-{{ threshold }} nohead

plot "-" using (xtime($1)):($2) with linespoints title '' pt 12
"#;
