use panel::packet::Record;

// Samples shown on either side of the trigger sample.
const TRIGGER_CONTEXT: usize = 2;

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// One line description of `rec`, with times relative to `t0`.
///
/// Samples are summarized rather than listed, e.g.,
/// `0.512: adc_offset=-2, divisor=4, ..., samples=400 points (-98..102), ...`
pub fn describe(rec: &Record, t0: f64) -> String {
    let samples = match rec.sample_range() {
        Some((min, max)) => format!("{} points ({min}..{max})", rec.sample_count()),
        None => "0 points".to_string(),
    };

    let mut fields = vec![
        ("adc_offset", rec.adc_offset.to_string()),
        ("divisor", rec.divisor.to_string()),
        ("format_version", rec.format_version.to_string()),
        ("reserved", rec.reserved.to_string()),
        ("sample_rate_hz", format!("{:.1}", rec.sample_rate_hz)),
        ("samples", samples),
        ("threshold", rec.threshold.to_string()),
        ("time_str", rec.captured_at.local.clone()),
        ("trigger_sample_index", opt(rec.trigger_sample_index)),
        ("triggered", rec.triggered.to_string()),
        ("voltage_scale", rec.voltage_scale.to_string()),
    ];
    if let Some(idx) = rec.trigger_sample_index {
        let start = idx.saturating_sub(TRIGGER_CONTEXT);
        let end = (idx + TRIGGER_CONTEXT).min(rec.sample_count());
        fields.push(("samples_t", format!("{:?}", &rec.samples[start..end])));
    }
    fields.sort_by_key(|(k, _)| *k);

    let fields: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{:.3}: {}", rec.captured_at.epoch - t0, fields.join(", "))
}
