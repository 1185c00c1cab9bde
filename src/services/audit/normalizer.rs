// Invariant Normalizer
// Re-derives the final verdict from deterministic evidence, overriding the
// judge's self-report in both directions.

use crate::models::{AuditMode, AuditReport, Severity, SubAuditVerdict};
use crate::services::config_store::AuditConfig;
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct ModeProfile {
    retention_min: f64,
    retention_max: f64,
    pass_score_floor: f64,
}

fn mode_profile(mode: AuditMode, config: &AuditConfig) -> ModeProfile {
    match mode {
        AuditMode::StrictFidelity => ModeProfile {
            retention_min: config.strict_retention_min,
            retention_max: config.strict_retention_max,
            pass_score_floor: config.strict_pass_score_floor,
        },
        AuditMode::Condensed => ModeProfile {
            retention_min: config.condensed_retention_min,
            retention_max: f64::INFINITY,
            pass_score_floor: config.condensed_pass_score_floor,
        },
    }
}

/// Finalize a filtered report. Judges under-report problems far less often
/// than they over-report chunk-boundary artifacts, so the recomputed gates
/// win over the judge's verdict on every disagreement.
pub fn normalize(
    report: &mut AuditReport,
    mode: AuditMode,
    sub_audit: Option<SubAuditVerdict>,
    config: &AuditConfig,
) {
    let profile = mode_profile(mode, config);
    let retention = report.metrics.retention_ratio;
    let retention_ok = retention >= profile.retention_min && retention <= profile.retention_max;
    let no_critical = report.findings.critical_kinds_empty();
    let sub_audit_ok = sub_audit.as_ref().map_or(true, |s| s.approved);
    let pause_requested = report.pause_recommendation.requested;

    let should_pass = no_critical && !pause_requested && sub_audit_ok && retention_ok;

    if let Some(sub) = &sub_audit {
        if !sub.approved {
            report.pause_recommendation.requested = true;
            for err in &sub.critical_errors {
                if !report.pause_recommendation.critical_areas.contains(err) {
                    report.pause_recommendation.critical_areas.push(err.clone());
                }
            }
        }
    }
    report.sub_audit = sub_audit;

    if should_pass {
        // A clean chunk under-scored by the judge must not read as failing.
        report.approved = true;
        report.severity = Severity::Low;
        report.score = report.score.max(profile.pass_score_floor);
        report.pause_recommendation.requested = false;
        report.pause_recommendation.reason = None;
        report.pause_recommendation.critical_areas.clear();
    } else if report.approved {
        // The judge approved against the evidence.
        report.approved = false;
        if !no_critical {
            report.severity = report.severity.max(Severity::High);
        } else {
            report.severity = report.severity.max(Severity::Medium);
        }
        let gate = failing_gate(no_critical, pause_requested, sub_audit_ok, retention_ok, retention);
        let reason = match &report.pause_recommendation.reason {
            Some(existing) => format!("{}; {}", existing, gate),
            None => gate,
        };
        report.pause_recommendation.requested = true;
        report.pause_recommendation.reason = Some(reason);
    } else if !no_critical {
        report.severity = report.severity.max(Severity::High);
    }

    info!(
        "[NORMALIZER] mode={} retention_ok={} no_critical={} sub_audit_ok={} pause={} -> approved={} severity={:?} score={:.2}",
        mode.as_str(),
        retention_ok,
        no_critical,
        sub_audit_ok,
        pause_requested,
        report.approved,
        report.severity,
        report.score
    );
}

fn failing_gate(
    no_critical: bool,
    pause_requested: bool,
    sub_audit_ok: bool,
    retention_ok: bool,
    retention: f64,
) -> String {
    if !no_critical {
        "Achados críticos confirmados após a filtragem.".to_string()
    } else if !retention_ok {
        format!("Razão de retenção fora dos limites do modo ({:.3}).", retention)
    } else if !sub_audit_ok {
        "Subauditoria de atribuição de fontes reprovou o documento.".to_string()
    } else if pause_requested {
        "Pausa solicitada durante a auditoria por trecho.".to_string()
    } else {
        "Evidência determinística contraria a aprovação do juiz.".to_string()
    }
}
