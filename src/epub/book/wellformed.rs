//! 书籍层面的格式良好性检查与修复
//!
//! 检查器本身无状态，这里负责把结果记录到资源上，并按配置决定何时自动修复。

use tracing::{debug, info, warn};

use crate::epub::book::Book;
use crate::epub::error::{EpubError, ManifestError, MendError, Result, WellFormedError};
use crate::epub::resource::{ResourceId, WellFormedState};
use crate::epub::wellformed::{self, MendOutcome, MendPolicy, Syntax, WellFormedResult};

impl Book {
    /// 检查资源并记录状态
    ///
    /// 已修复的资源检查通过时保持`Mended`状态。
    pub fn check_well_formed(&mut self, id: &str) -> Result<WellFormedResult> {
        let resource = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        let (Some(syntax), Some(text)) = (Syntax::for_resource(resource), resource.text()) else {
            return Err(ManifestError::NotText(id.to_string()).into());
        };

        let result = wellformed::check(text, syntax);
        resource.state = match &result.error {
            None if resource.state == WellFormedState::Mended => WellFormedState::Mended,
            None => WellFormedState::WellFormed,
            Some(error) => WellFormedState::Malformed(error.clone()),
        };
        Ok(result)
    }

    /// 检查全部可检查的资源，返回格式错误的资源（按清单顺序）
    pub fn check_all(&mut self) -> Vec<(ResourceId, WellFormedError)> {
        let ids = self.checkable_ids();
        let mut malformed = Vec::new();
        for id in ids {
            if let Ok(WellFormedResult { error: Some(error), .. }) = self.check_well_formed(id.as_str()) {
                debug!("{}: {}", id, error);
                malformed.push((id, error));
            }
        }
        malformed
    }

    /// 修复资源
    ///
    /// 格式良好的资源原样保留；否则做一次修复并复查，仍然失败时资源内容不变，
    /// 状态记为`MendFailed`。
    pub fn mend(&mut self, id: &str, policy: MendPolicy) -> Result<MendOutcome> {
        let resource = self
            .resources
            .get(id)
            .ok_or_else(|| ManifestError::UnknownResource(id.to_string()))?;
        let (Some(syntax), Some(text)) = (Syntax::for_resource(resource), resource.text()) else {
            return Err(MendError::Unsupported(id.to_string()).into());
        };

        match wellformed::mend(text, syntax) {
            Ok(MendOutcome::AlreadyWellFormed) => {
                if let Some(resource) = self.resources.get_mut(id) {
                    if resource.state != WellFormedState::Mended {
                        resource.state = WellFormedState::WellFormed;
                    }
                }
                Ok(MendOutcome::AlreadyWellFormed)
            }
            Ok(MendOutcome::Mended(mended)) => {
                self.set_text(id, mended.clone())?;
                if let Some(resource) = self.resources.get_mut(id) {
                    resource.state = WellFormedState::Mended;
                }
                info!("已修复 {} ({:?})", id, policy);
                Ok(MendOutcome::Mended(mended))
            }
            Err(error) => {
                if let (Some(resource), MendError::StillMalformed(remaining)) =
                    (self.resources.get_mut(id), &error)
                {
                    resource.state = WellFormedState::MendFailed(remaining.clone());
                }
                warn!("{} 修复失败: {}", id, error);
                Err(EpubError::Mend(error))
            }
        }
    }

    /// 修复全部格式错误的资源，返回修复失败的资源
    pub fn mend_all(&mut self, policy: MendPolicy) -> Vec<(ResourceId, MendError)> {
        let mut failures = Vec::new();
        for id in self.checkable_ids() {
            match self.mend(id.as_str(), policy) {
                Ok(_) => {}
                Err(EpubError::Mend(error)) => failures.push((id, error)),
                Err(error) => warn!("{}: {}", id, error),
            }
        }
        failures
    }

    /// 从代码视图切换到预览时调用
    ///
    /// 开启了`mend_on_view_switch`时自动修复，否则只检查。
    pub fn on_view_switch(&mut self, id: &str) -> Result<WellFormedResult> {
        if self.mend_settings.mend_on_view_switch {
            match self.mend(id, MendPolicy::OnViewSwitch) {
                Ok(_) => return Ok(WellFormedResult::well_formed()),
                Err(EpubError::Mend(MendError::StillMalformed(error))) => {
                    return Ok(WellFormedResult::malformed(error));
                }
                Err(error) => return Err(error),
            }
        }
        self.check_well_formed(id)
    }

    /// 内容变化后重新检查，不可检查的资源忽略
    pub(super) fn refresh_state(&mut self, id: &str) {
        if self
            .resources
            .get(id)
            .is_some_and(|resource| resource.is_checkable())
        {
            if let Err(error) = self.check_well_formed(id) {
                debug!("重新检查{}失败: {}", id, error);
            }
        }
    }

    /// 按清单顺序列出可检查的资源
    fn checkable_ids(&self) -> Vec<ResourceId> {
        self.resources()
            .into_iter()
            .filter(|resource| Syntax::for_resource(resource).is_some() && resource.is_text())
            .map(|resource| resource.id().clone())
            .collect()
    }
}
