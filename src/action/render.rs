//! Template expansion of step actions.

use crate::error::Result;
use crate::plan::StepAction;
use crate::template::TemplateContext;
use std::collections::BTreeMap;

fn render_map(
    ctx: &TemplateContext,
    map: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), ctx.render(v)?)))
        .collect()
}

/// Return a copy of `action` with every template field rendered
pub fn render_action(action: &StepAction, ctx: &TemplateContext) -> Result<StepAction> {
    Ok(match action {
        StepAction::Noop => StepAction::Noop,
        StepAction::Command {
            program,
            args,
            working_dir,
            env,
            capture,
        } => StepAction::Command {
            program: ctx.render(program)?,
            args: ctx.render_all(args)?,
            working_dir: ctx.render_opt(working_dir.as_ref())?,
            env: render_map(ctx, env)?,
            capture: capture.clone(),
        },
        StepAction::PushBranch { remote, branch } => StepAction::PushBranch {
            remote: ctx.render(remote)?,
            branch: ctx.render(branch)?,
        },
        StepAction::CreatePullRequest {
            head,
            base,
            title,
            body,
            draft,
        } => StepAction::CreatePullRequest {
            head: ctx.render(head)?,
            base: ctx.render(base)?,
            title: ctx.render(title)?,
            body: ctx.render(body)?,
            draft: *draft,
        },
        StepAction::CreateRelease {
            tag,
            title,
            notes,
            target,
            prerelease,
        } => StepAction::CreateRelease {
            tag: ctx.render(tag)?,
            title: ctx.render_opt(title.as_ref())?,
            notes: ctx.render(notes)?,
            target: ctx.render_opt(target.as_ref())?,
            prerelease: *prerelease,
        },
        StepAction::PromoteRelease { tag, latest } => StepAction::PromoteRelease {
            tag: ctx.render(tag)?,
            latest: *latest,
        },
        StepAction::DispatchWorkflow {
            workflow,
            git_ref,
            inputs,
            start_timeout_secs,
        } => StepAction::DispatchWorkflow {
            workflow: ctx.render(workflow)?,
            git_ref: ctx.render(git_ref)?,
            inputs: render_map(ctx, inputs)?,
            start_timeout_secs: *start_timeout_secs,
        },
        StepAction::CreateDiscussion {
            category,
            title,
            body,
            fallback_manual,
        } => StepAction::CreateDiscussion {
            category: ctx.render(category)?,
            title: ctx.render(title)?,
            body: ctx.render(body)?,
            fallback_manual: *fallback_manual,
        },
        StepAction::ManageMilestones { close, create } => StepAction::ManageMilestones {
            close: ctx.render_opt(close.as_ref())?,
            create: ctx.render_opt(create.as_ref())?,
        },
        StepAction::Http {
            method,
            url,
            headers,
            body,
        } => StepAction::Http {
            method: ctx.render(method)?,
            url: ctx.render(url)?,
            headers: render_map(ctx, headers)?,
            body: body.as_ref().map(|b| ctx.render_json(b)).transpose()?,
        },
        StepAction::WaitPullRequestMerge { pr_number } => StepAction::WaitPullRequestMerge {
            pr_number: ctx.render(pr_number)?,
        },
        StepAction::VerifyReleaseAssets { tag, assets } => StepAction::VerifyReleaseAssets {
            tag: ctx.render(tag)?,
            assets: ctx.render_all(assets)?,
        },
    })
}
