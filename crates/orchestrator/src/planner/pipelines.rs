//! Built-in pipelines: each job kind is a linear chain of unit kinds

use async_trait::async_trait;
use tracing::debug;

use super::{JobPlanner, PlanContext, PlanError, PlanStep};
use crate::model::{JobKind, PipelineParams, ResourceKind, UnitKind};

/// Plans a job as a chain where each step waits on the previous one
///
/// Before planning, referenced uploads are resolved to paths and the style
/// template to its content, so every unit carries complete parameters.
#[derive(Debug, Clone)]
pub struct ChainPlanner {
    kind: JobKind,
    steps: Vec<UnitKind>,
    needs_text: bool,
    needs_link: bool,
    needs_style: bool,
}

impl ChainPlanner {
    pub fn for_kind(kind: JobKind) -> Self {
        use UnitKind::*;
        let (steps, needs_text, needs_link, needs_style) = match kind {
            JobKind::LipSyncVideoVoice => (vec![LipSync], false, false, false),
            JobKind::LipSyncVideoVoiceTone => (vec![VoiceSynthesis, LipSync], true, false, false),
            JobKind::LipSyncVideoVoiceStyle => (
                vec![CopyGeneration, VoiceSynthesis, LipSync],
                true,
                false,
                true,
            ),
            JobKind::OneClickClone => (
                vec![LinkParse, CopyRewrite, VoiceSynthesis, LipSync],
                false,
                true,
                false,
            ),
        };
        Self {
            kind,
            steps,
            needs_text,
            needs_link,
            needs_style,
        }
    }

    pub fn steps(&self) -> &[UnitKind] {
        &self.steps
    }

    async fn resolve_media(
        ctx: &PlanContext,
        id: Option<i64>,
        expected: ResourceKind,
        what: &'static str,
    ) -> Result<String, PlanError> {
        let id = id.ok_or(PlanError::MissingParameter(what))?;
        let resource = ctx.resources.get(id).await.map_err(|e| PlanError::Resource {
            id,
            reason: e.to_string(),
        })?;
        if resource.kind != expected {
            return Err(PlanError::Resource {
                id,
                reason: format!("expected {}, found {}", expected.as_str(), resource.kind.as_str()),
            });
        }
        Ok(resource.path)
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

#[async_trait]
impl JobPlanner for ChainPlanner {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn plan(
        &self,
        mut params: PipelineParams,
        ctx: &PlanContext,
    ) -> Result<Vec<PlanStep>, PlanError> {
        if self.needs_text && !present(&params.text) {
            return Err(PlanError::MissingParameter("text"));
        }
        if self.needs_link && !present(&params.link) {
            return Err(PlanError::MissingParameter("link"));
        }

        params.video_path =
            Some(Self::resolve_media(ctx, params.video_id, ResourceKind::Video, "video_id").await?);
        params.audio_path =
            Some(Self::resolve_media(ctx, params.audio_id, ResourceKind::Audio, "audio_id").await?);

        if self.needs_style {
            let style_id = params.style_id.ok_or(PlanError::MissingParameter("style_id"))?;
            let content = ctx
                .styles
                .style_content(style_id)
                .await?
                .ok_or(PlanError::UnknownStyle(style_id))?;
            params.style_content = Some(content);
        }

        debug!(kind = %self.kind, steps = self.steps.len(), "Planned job");
        let unit_params = params.to_value();
        Ok(self
            .steps
            .iter()
            .enumerate()
            .map(|(index, &kind)| PlanStep {
                kind,
                params: unit_params.clone(),
                depends_on: if index == 0 { vec![] } else { vec![index - 1] },
                completed: false,
            })
            .collect())
    }
}
