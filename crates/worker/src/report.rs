use tickwatch_core::domain::AnalysisResult;

const MAX_REASONS: usize = 3;

/// `name(code) price change% | SIGNAL score N`
pub fn summary_line(result: &AnalysisResult) -> String {
    format!(
        "{}({}) {:.2} {:+.2}% | {} score {}",
        result.stock_name,
        result.code,
        result.current_price,
        result.change_pct,
        result.buy_signal,
        result.signal_score
    )
}

pub fn detail_block(result: &AnalysisResult) -> String {
    let volume_ratio = result
        .volume_ratio
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string());

    let mut out = summary_line(result);
    out.push_str(&format!(
        "\n  MA5 {:.2} (bias {:+.2}%) | volume ratio {}",
        result.ma5, result.bias_ma5, volume_ratio
    ));
    for reason in result.signal_reasons.iter().take(MAX_REASONS) {
        out.push_str("\n  - ");
        out.push_str(reason);
    }
    out
}
