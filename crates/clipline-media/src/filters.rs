//! FFmpeg filter expressions for clip encoding.

use clipline_models::{QualityProfile, DEFAULT_AUDIO_SAMPLE_RATE};

/// Fade length clamped so fade-in and fade-out never overlap.
pub fn effective_fade(duration: f64, fade: f64) -> f64 {
    fade.min(duration / 2.0).max(0.0)
}

/// Video fade-in at the start and fade-out at the end of a clip.
pub fn video_fade_filter(duration: f64, fade: f64) -> Option<String> {
    let fade = effective_fade(duration, fade);
    if fade <= 0.0 {
        return None;
    }
    Some(format!(
        "fade=t=in:st=0:d={fade:.3},fade=t=out:st={out:.3}:d={fade:.3}",
        fade = fade,
        out = duration - fade
    ))
}

/// Audio counterpart of [`video_fade_filter`].
pub fn audio_fade_filter(duration: f64, fade: f64) -> Option<String> {
    let fade = effective_fade(duration, fade);
    if fade <= 0.0 {
        return None;
    }
    Some(format!(
        "afade=t=in:st=0:d={fade:.3},afade=t=out:st={out:.3}:d={fade:.3}",
        fade = fade,
        out = duration - fade
    ))
}

/// Video chain for one extracted segment: scale/pad to the profile, then optional fades.
pub fn segment_video_filter(profile: &QualityProfile, fade: Option<String>) -> String {
    match fade {
        Some(fade) => format!("{},{}", profile.scale_filter(), fade),
        None => profile.scale_filter(),
    }
}

/// Filter graph that normalises `inputs` streams and concatenates them.
///
/// Each input is scaled, padded and resampled to the same geometry, frame
/// rate and sample rate before `concat`, so heterogeneous segments join
/// cleanly. Output pads are `[outv]` and `[outa]`.
pub fn concat_filter_graph(inputs: usize, profile: &QualityProfile) -> String {
    let mut graph = String::new();

    for i in 0..inputs {
        graph.push_str(&format!(
            "[{i}:v]{scale}[v{i}];[{i}:a]aresample={rate},aformat=channel_layouts=stereo[a{i}];",
            i = i,
            scale = profile.scale_filter(),
            rate = DEFAULT_AUDIO_SAMPLE_RATE
        ));
    }

    for i in 0..inputs {
        graph.push_str(&format!("[v{i}][a{i}]", i = i));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=1[outv][outa]", inputs));

    graph
}
