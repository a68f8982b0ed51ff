//! Renderer family: one lifecycle, five strategies.
//!
//! A render runs `should_render`, `prepare_to_render`, `render` and
//! `finish_rendering` in that order. Preparing touches only the live
//! `<head>`; the body stays as it was until `render` commits the swap.

pub mod head;
pub mod morph;
pub mod permanent;

use crate::snapshot::Snapshot;
use crate::snapshot::tracked_signature;
use head::HeadMerge;
use head::merge_head;
use morph::count_scripts;
use morph::morph_children;
use morph::morph_element;
use permanent::PermanentSwap;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_dom::Document;
use tr_dom::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStrategy {
    Replace,
    Morph,
    Error,
    FrameReplace,
    FrameMorph,
}

impl RenderStrategy {
    pub fn is_frame(self) -> bool {
        matches!(self, Self::FrameReplace | Self::FrameMorph)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Morph => "morph",
            Self::Error => "error",
            Self::FrameReplace => "frame-replace",
            Self::FrameMorph => "frame-morph",
        }
    }
}

/// The region a render writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Page,
    Frame(NodeId),
}

/// Circumstances of a render that decide its strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderPolicy {
    pub is_page_refresh: bool,
    /// The response carried a 4xx/5xx status.
    pub failed_response: bool,
    /// The live page declares `turbo-refresh-method=morph`.
    pub page_prefers_morph: bool,
    /// The frame carries `refresh="morph"`.
    pub frame_prefers_morph: bool,
}

pub fn select_strategy(target: RenderTarget, snapshot: &Snapshot, policy: RenderPolicy) -> RenderStrategy {
    match target {
        RenderTarget::Frame(_) if policy.is_page_refresh && policy.frame_prefers_morph => {
            RenderStrategy::FrameMorph
        }
        RenderTarget::Frame(_) => RenderStrategy::FrameReplace,
        RenderTarget::Page if policy.failed_response => {
            if policy.page_prefers_morph && snapshot.should_morph_page() {
                RenderStrategy::Morph
            } else {
                RenderStrategy::Error
            }
        }
        RenderTarget::Page if policy.is_page_refresh && snapshot.should_morph_page() => RenderStrategy::Morph,
        RenderTarget::Page => RenderStrategy::Replace,
    }
}

/// Verdict of [`Renderer::should_render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderGuard {
    Render,
    /// Abandon the soft render and reload the page for this reason.
    Reload(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub strategy: RenderStrategy,
    /// Root of the rendered region: the new body, or the frame element.
    pub region: Option<NodeId>,
    pub activated_scripts: usize,
    pub autofocus: Option<NodeId>,
    pub permanent_elements: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Created,
    Prepared,
    Rendered,
}

pub struct Renderer<'a> {
    strategy: RenderStrategy,
    document: &'a mut Document,
    snapshot: &'a Snapshot,
    target: RenderTarget,
    is_preview: bool,
    stage: Stage,
    swap: PermanentSwap,
    incoming_head: Option<NodeId>,
    incoming_body: Option<NodeId>,
    region: Option<NodeId>,
    scripts: usize,
}

impl<'a> Renderer<'a> {
    pub fn new(
        strategy: RenderStrategy,
        document: &'a mut Document,
        snapshot: &'a Snapshot,
        target: RenderTarget,
        is_preview: bool,
    ) -> Self {
        Self {
            strategy,
            document,
            snapshot,
            target,
            is_preview,
            stage: Stage::Created,
            swap: PermanentSwap::default(),
            incoming_head: None,
            incoming_body: None,
            region: None,
            scripts: 0,
        }
    }

    pub fn strategy(&self) -> RenderStrategy {
        self.strategy
    }

    pub fn is_preview(&self) -> bool {
        self.is_preview
    }

    /// Page renders refuse snapshots that demand a reload or whose tracked
    /// head elements differ from the live ones.
    pub fn should_render(&self) -> RenderGuard {
        match self.strategy {
            RenderStrategy::Replace | RenderStrategy::Morph => {
                if !self.snapshot.is_visitable() {
                    RenderGuard::Reload("turbo_visit_control_is_reload")
                } else if tracked_signature(self.document) != self.snapshot.tracked_signature() {
                    RenderGuard::Reload("tracked_element_mismatch")
                } else {
                    RenderGuard::Render
                }
            }
            RenderStrategy::Error | RenderStrategy::FrameReplace | RenderStrategy::FrameMorph => {
                RenderGuard::Render
            }
        }
    }

    /// Merges the head and stages incoming nodes with permanent-element
    /// placeholders.
    pub fn prepare_to_render(&mut self) -> DriveResult<()> {
        if self.stage != Stage::Created {
            return Ok(());
        }
        let snapshot = self.snapshot;
        let source = snapshot.document();

        match self.strategy {
            RenderStrategy::Replace => {
                let policy = if self.is_preview {
                    HeadMerge::Append
                } else {
                    HeadMerge::Merge
                };
                self.scripts += merge_head(self.document, source, policy)?.scripts;
                if let Some(body) = self.snapshot.body() {
                    let incoming = self.document.import_node(source, body)?;
                    if let Some(live) = self.document.body() {
                        self.swap = PermanentSwap::enter(self.document, live, incoming)?;
                    }
                    self.incoming_body = Some(incoming);
                }
            }
            RenderStrategy::Morph => {
                self.scripts += merge_head(self.document, source, HeadMerge::Merge)?.scripts;
            }
            RenderStrategy::Error => {
                if let Some(head) = self.snapshot.head() {
                    self.incoming_head = Some(self.document.import_node(source, head)?);
                }
                if let Some(body) = self.snapshot.body() {
                    self.incoming_body = Some(self.document.import_node(source, body)?);
                }
            }
            RenderStrategy::FrameReplace => {
                let element = self.frame_element()?;
                let fragment = self.document.create_fragment();
                for child in source.children(self.snapshot.root_element()) {
                    let imported = self.document.import_node(source, *child)?;
                    self.document.append_child(fragment, imported)?;
                }
                self.swap = PermanentSwap::enter(self.document, element, fragment)?;
                self.incoming_body = Some(fragment);
            }
            RenderStrategy::FrameMorph => {}
        }

        self.stage = Stage::Prepared;
        Ok(())
    }

    /// Commits the swap.
    pub fn render(&mut self) -> DriveResult<()> {
        match self.stage {
            Stage::Created => self.prepare_to_render()?,
            Stage::Prepared => {}
            Stage::Rendered => return Ok(()),
        }
        let snapshot = self.snapshot;
        let source = snapshot.document();

        match self.strategy {
            RenderStrategy::Replace => {
                if let Some(incoming) = self.incoming_body.take() {
                    self.scripts += count_scripts(self.document, incoming);
                    self.swap.detach_live(self.document);
                    self.install(incoming, "body")?;
                    self.region = Some(incoming);
                }
            }
            RenderStrategy::Morph => {
                if let (Some(live), Some(body)) = (self.document.body(), self.snapshot.body()) {
                    let (region, report) = morph_element(self.document, live, source, body)?;
                    self.scripts += report.scripts;
                    self.region = Some(region);
                }
            }
            RenderStrategy::Error => {
                if let Some(head) = self.incoming_head.take() {
                    self.scripts += count_scripts(self.document, head);
                    self.install(head, "head")?;
                }
                if let Some(body) = self.incoming_body.take() {
                    self.scripts += count_scripts(self.document, body);
                    self.install(body, "body")?;
                    self.region = Some(body);
                }
            }
            RenderStrategy::FrameReplace => {
                let element = self.frame_element()?;
                if let Some(fragment) = self.incoming_body.take() {
                    self.scripts += count_scripts(self.document, fragment);
                    self.swap.detach_live(self.document);
                    self.document.clear_children(element);
                    for child in self.document.children(fragment).to_vec() {
                        self.document.append_child(element, child)?;
                    }
                    self.document.dispose(fragment);
                }
                self.region = Some(element);
            }
            RenderStrategy::FrameMorph => {
                let element = self.frame_element()?;
                let report = morph_children(self.document, element, source, self.snapshot.root_element())?;
                self.scripts += report.scripts;
                self.region = Some(element);
            }
        }

        self.stage = Stage::Rendered;
        log::debug!(
            target: "trellis::render",
            "rendered with {} (preview: {})",
            self.strategy.as_str(),
            self.is_preview
        );
        Ok(())
    }

    /// Restores permanent elements and reports scripts and autofocus.
    pub fn finish_rendering(self) -> DriveResult<RenderReport> {
        if self.stage != Stage::Rendered {
            return Err(DriveError::new(
                "render.stage_invalid",
                format!("{} render finished before it was committed", self.strategy.as_str()),
            ));
        }
        let permanent_elements = self.swap.leave(self.document)?;
        let autofocus = self.region.and_then(|region| {
            self.document
                .descendants(region)
                .into_iter()
                .find(|node| self.document.has_attr(*node, "autofocus"))
        });

        Ok(RenderReport {
            strategy: self.strategy,
            region: self.region,
            activated_scripts: self.scripts,
            autofocus,
            permanent_elements,
        })
    }

    fn frame_element(&self) -> DriveResult<NodeId> {
        match self.target {
            RenderTarget::Frame(element) if self.document.is_alive(element) => Ok(element),
            RenderTarget::Frame(_) => Err(DriveError::new(
                "dom.node_missing",
                "frame element was removed before rendering",
            )),
            RenderTarget::Page => Err(DriveError::new(
                "render.target_invalid",
                format!("{} needs a frame target", self.strategy.as_str()),
            )),
        }
    }

    /// Puts `incoming` in place of the live `<head>`/`<body>`, or appends it
    /// to `<html>` when there is none.
    fn install(&mut self, incoming: NodeId, section: &str) -> DriveResult<()> {
        let live = match section {
            "head" => self.document.head(),
            _ => self.document.body(),
        };
        match live {
            Some(live) => {
                self.document.replace_node(live, incoming)?;
                self.document.dispose(live);
            }
            None => {
                let html = self.document.document_element().ok_or_else(|| {
                    DriveError::new("dom.node_missing", "document has no <html> element")
                })?;
                self.document.append_child(html, incoming)?;
            }
        }
        Ok(())
    }
}
