use anyhow::{bail, Context};
use audita_ai_lib::models::AuditMode;
use audita_ai_lib::services::audit::AuditEngine;
use audita_ai_lib::services::config_store::{AuditConfig, ConfigStore};
use audita_ai_lib::services::providers::LiveJudge;
use std::sync::Arc;

fn preview(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    audita_ai_lib::init_logging();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!(
            "Usage:\n  cargo run --bin audit_files -- <raw.txt> <formatted.txt> [--provider <name[:model]>] [--mode <strict-fidelity|condensed>] [--workers <n>] [--out <json_path>]\n\nNotes:\n  - O provedor padrão vem do arquivo de configuração (ou openai).\n  - A chave de API é lida do ambiente (ex.: OPENAI_API_KEY) ou do config.json."
        );
        return Ok(());
    }

    let raw_path = args[1].clone();
    let formatted_path = args[2].clone();
    let provider_arg = parse_arg_value(&args, "--provider");
    let mode_arg = parse_arg_value(&args, "--mode");
    let workers_arg = parse_arg_value(&args, "--workers").and_then(|s| s.parse::<usize>().ok());
    let out_path = parse_arg_value(&args, "--out");

    let raw = std::fs::read_to_string(&raw_path)
        .with_context(|| format!("read raw file failed: {}", raw_path))?;
    let formatted = std::fs::read_to_string(&formatted_path)
        .with_context(|| format!("read formatted file failed: {}", formatted_path))?;

    let mut config = ConfigStore::default_config_dir()
        .map(ConfigStore::new)
        .and_then(|store| store.load().ok())
        .map(|app| app.audit)
        .unwrap_or_else(AuditConfig::default);

    if let Some(workers) = workers_arg {
        config.max_workers = workers.max(1);
    }
    let mode = AuditMode::from_str(mode_arg.as_deref().unwrap_or(&config.default_mode));

    let provider_spec = provider_arg
        .unwrap_or_else(|| format!("{}:{}", config.judge_provider, config.judge_model));
    let judge = match LiveJudge::from_spec(&provider_spec) {
        Ok(j) => j,
        Err(e) => bail!("judge setup failed for '{}': {}", provider_spec, e),
    };
    config.judge_model = judge.model().to_string();

    println!("Raw: {} ({} chars)", raw_path, raw.chars().count());
    println!("Formatted: {} ({} chars)", formatted_path, formatted.chars().count());
    println!("Judge: {} (model {})", provider_spec, config.judge_model);
    println!("Mode: {}", mode.as_str());
    println!();

    let engine = AuditEngine::new(Arc::new(judge), config);
    let report = engine.audit(&raw, &formatted, mode).await;

    println!("Report {} ({})", report.report_id, report.generated_at);
    println!(
        "approved={} score={:.2} severity={:?} degraded={}",
        report.approved, report.score, report.severity, report.degraded
    );
    println!(
        "retention={:.3} references raw/formatted: {}/{}",
        report.metrics.retention_ratio,
        report.metrics.raw_reference_count,
        report.metrics.formatted_reference_count
    );
    println!(
        "chunks={} (max_chars={} overlap={})",
        report.chunking.chunk_count, report.chunking.max_chars, report.chunking.overlap_chars
    );

    let findings = &report.findings;
    println!(
        "findings: omissions={} distortions={} structural={} context={} hallucinations={}",
        findings.omissions.len(),
        findings.distortions.len(),
        findings.structural_issues.len(),
        findings.context_issues.len(),
        findings.hallucinations.len()
    );
    for (i, o) in findings.omissions.iter().enumerate() {
        println!(
            "[O{:02}] {:?}/{:?}  {}",
            i,
            o.severity,
            o.verdict,
            preview(&o.raw_excerpt, 100)
        );
    }
    for (i, h) in findings.hallucinations.iter().enumerate() {
        println!(
            "[H{:02}] {:?} conf={:.2}  {}",
            i,
            h.severity,
            h.confidence,
            preview(&h.formatted_excerpt, 100)
        );
    }

    if report.pause_recommendation.requested {
        println!();
        println!(
            "PAUSE recommended: {}",
            report.pause_recommendation.reason.as_deref().unwrap_or("(sem motivo)")
        );
        for area in &report.pause_recommendation.critical_areas {
            println!("  - {}", area);
        }
    }

    if let Some(out_path) = out_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&out_path, json)
            .with_context(|| format!("write out failed: {}", out_path))?;
        println!();
        println!("Wrote JSON: {}", out_path);
    }

    Ok(())
}
