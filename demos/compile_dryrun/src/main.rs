//! Compiles a small deferred frame twice without any GPU attached and prints the resulting command lists and
//! barriers. The second frame starts from the states the first one left behind.

use anyhow::Result;
use jobgraph::{
    CompileResult, GpuJob, JobBuilder, JobCompiler, RenderTargets, ResourceRef, ResourceTable, RootJob,
    StateCache, jobgraph_state::ResourceStateTable,
};

struct FrameResources {
    gbuffer: ResourceRef,
    depth: ResourceRef,
    lit: ResourceRef,
    histogram: ResourceRef,
    swapchain: ResourceRef,
    constants: ResourceRef,
}

impl FrameResources {
    fn new(states: &mut ResourceStateTable) -> Self {
        let mut next = || ResourceRef::new(states.create_state_slot());
        FrameResources {
            gbuffer: next(),
            depth: next(),
            lit: next(),
            histogram: next(),
            swapchain: next(),
            constants: next(),
        }
    }
}

//  root -> clear -> gbuffer -> lighting -> tonemap -> present
//                           -> histogram ->/
fn declare_frame(builder: &mut JobBuilder, res: &FrameResources) -> Result<RootJob> {
    let root = builder.create_root_job();

    let clear = builder.create_clear_render_target_job();
    builder.set_name(clear, "clear")?;
    builder.depends_on(clear, root)?;
    builder.set_clear_targets(
        clear,
        RenderTargets::new().with_color(res.gbuffer).with_depth(res.depth),
        [0.0, 0.0, 0.0, 1.0],
    )?;

    let gbuffer = builder.create_draw_job();
    builder.set_name(gbuffer, "gbuffer")?;
    builder.depends_on(gbuffer, clear)?;
    builder.set_constant_buffer(gbuffer, 0, res.constants)?;
    builder.set_render_target(
        gbuffer,
        RenderTargets::new().with_color(res.gbuffer).with_depth(res.depth),
    )?;

    let lighting = builder.create_compute_job();
    builder.set_name(lighting, "lighting")?;
    builder.depends_on(lighting, gbuffer)?;
    builder.set_resource_table(lighting, 0, ResourceTable::new([res.gbuffer, res.depth]))?;
    builder.set_uav_table(lighting, 0, ResourceTable::new([res.lit]))?;
    builder.set_dispatch_params(lighting, 240, 135, 1)?;

    let histogram = builder.create_compute_job();
    builder.set_name(histogram, "histogram")?;
    builder.depends_on(histogram, gbuffer)?;
    builder.set_resource_table(histogram, 0, ResourceTable::new([res.gbuffer]))?;
    builder.set_uav_table(histogram, 0, ResourceTable::new([res.histogram]))?;

    let tonemap = builder.create_draw_job();
    builder.set_name(tonemap, "tonemap")?;
    builder.depends_on(tonemap, lighting)?;
    builder.depends_on(tonemap, histogram)?;
    builder.set_resource_table(tonemap, 0, ResourceTable::new([res.lit, res.histogram]))?;
    builder.set_render_target(tonemap, RenderTargets::new().with_color(res.swapchain))?;

    let present = builder.create_display_job();
    builder.set_name(present, "present")?;
    builder.depends_on(present, tonemap)?;
    builder.set_presentable(present, res.swapchain)?;

    Ok(root)
}

fn print_result(builder: &JobBuilder, result: &CompileResult) {
    println!("{result}");
    for path in result.paths() {
        let names: Vec<_> = path
            .jobs()
            .map(|job| {
                builder
                    .table()
                    .get(job)
                    .and_then(|n| n.name())
                    .unwrap_or("<unnamed>")
            })
            .collect();
        println!("{}: {}", path.id(), names.join(" -> "));
    }
}

fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Trace)
        .init()?;

    let mut states = ResourceStateTable::new();
    let resources = FrameResources::new(&mut states);
    let cache = StateCache::new(&mut states);
    let mut compiler = JobCompiler::default().with_state_cache(cache);

    for frame in 0..2 {
        let mut builder = JobBuilder::new();
        let root = declare_frame(&mut builder, &resources)?;

        let result = compiler.compile(&mut states, builder.table(), root)?;
        println!("Frame {frame}:");
        print_result(&builder, &result);

        if !result.is_submittable() {
            anyhow::bail!(
                "frame {frame} is not submittable: {} stale jobs, {} violations",
                result.stale_jobs().len(),
                result.violations().len()
            );
        }
        let committed = cache.commit(&mut states, &result)?;
        log::info!("Committed {committed} states after frame {frame}");

        let released = builder.delete(root)?;
        log::info!("Released {released} jobs of {}", root.handle());
    }

    compiler.release(&mut states);
    cache.destroy(&mut states)?;
    Ok(())
}
