use chrono::Utc;
use rusqlite::{params, Row};

use super::*;
use crate::types::LlmAnalysis;

impl BriefingDb {
    // =========================================================================
    // Multi-model analyses
    // =========================================================================

    fn map_analysis_row(row: &Row<'_>) -> rusqlite::Result<LlmAnalysis> {
        Ok(LlmAnalysis {
            id: Some(row.get(0)?),
            briefing_id: row.get(1)?,
            topic: row.get(2)?,
            claude_analysis: row.get(3)?,
            gemini_analysis: row.get(4)?,
            grok_analysis: row.get(5)?,
            perplexity_analysis: row.get(6)?,
            consensus: row.get(7)?,
            dissent: row.get(8)?,
            recommendation: row.get(9)?,
            confidence_score: row.get::<_, Option<i64>>(10)?.map(|v| v.clamp(0, 100) as u8),
            model_agreement: row.get::<_, Option<i64>>(11)?.map(|v| v.clamp(0, 100) as u8),
        })
    }

    pub fn create_llm_analysis(&self, analysis: &LlmAnalysis) -> Result<i64, DbError> {
        self.conn.execute(
            "INSERT INTO llm_analyses
                (briefing_id, topic, claude_analysis, gemini_analysis, grok_analysis,
                 perplexity_analysis, consensus, dissent, recommendation, confidence_score,
                 model_agreement, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                analysis.briefing_id,
                analysis.topic,
                analysis.claude_analysis,
                analysis.gemini_analysis,
                analysis.grok_analysis,
                analysis.perplexity_analysis,
                analysis.consensus,
                analysis.dissent,
                analysis.recommendation,
                analysis.confidence_score.map(i64::from),
                analysis.model_agreement.map(i64::from),
                to_db_time(&Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_analyses_for_briefing(&self, briefing_id: i64) -> Result<Vec<LlmAnalysis>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, briefing_id, topic, claude_analysis, gemini_analysis, grok_analysis,
                    perplexity_analysis, consensus, dissent, recommendation,
                    confidence_score, model_agreement
             FROM llm_analyses WHERE briefing_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![briefing_id], Self::map_analysis_row)?;
        let mut analyses = Vec::new();
        for row in rows {
            analyses.push(row?);
        }
        Ok(analyses)
    }
}
