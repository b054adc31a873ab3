use std::fmt::Write as _;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use kernel_lab_common::config::RenderConfig;
use kernel_lab_common::frame::{CapturedFrame, PixelBuffer};
use kernel_lab_filter::FilterResult;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode {kernel} as JPEG: {source}")]
    Encode {
        kernel: String,
        source: image::ImageError,
    },
    #[error("{width}x{height} frame is too large to encode")]
    Dimensions { width: usize, height: usize },
}

/// JPEG-encode the grayscale result of `kernel`.
pub fn encode_jpeg(kernel: &str, pixels: &PixelBuffer, quality: u8) -> Result<Vec<u8>, RenderError> {
    let (Ok(w), Ok(h)) = (u32::try_from(pixels.width()), u32::try_from(pixels.height())) else {
        return Err(RenderError::Dimensions {
            width: pixels.width(),
            height: pixels.height(),
        });
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(pixels.as_slice(), w, h, ExtendedColorType::L8)
        .map_err(|source| RenderError::Encode {
            kernel: kernel.to_string(),
            source,
        })?;
    Ok(out)
}

/// `data:image/jpeg;base64,...` URL for inline `<img>` tags.
pub fn jpeg_data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", general_purpose::STANDARD.encode(jpeg))
}

/// Render the gallery page: one card per filter result, in order.
pub fn render_page(
    results: &FilterResult,
    frame: &CapturedFrame,
    config: &RenderConfig,
) -> Result<String, RenderError> {
    let mut cards = String::new();
    for (name, pixels) in results.iter() {
        let jpeg = encode_jpeg(name, pixels, config.jpeg_quality)?;
        debug!(kernel = name, bytes = jpeg.len(), "encoded filter result");
        let name = escape_html(name);
        // Writing to a String cannot fail.
        let _ = write!(
            cards,
            r#"<div><h3>{name}</h3><img src="{src}" alt="{name}"></div>"#,
            src = jpeg_data_url(&jpeg),
        );
    }

    let title = escape_html(&config.title);
    let columns = config.columns.max(1);
    let footer = format!(
        "{}x{} frame from {} at {}",
        frame.pixels.width(),
        frame.pixels.height(),
        escape_html(&frame.source),
        frame.captured_at(),
    );

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
      body {{
        font-family: Arial, sans-serif;
      }}
      .image-grid {{
        display: grid;
        grid-template-columns: repeat({columns}, 1fr);
        gap: 20px;
        justify-items: center;
        align-items: center;
        padding: 20px;
      }}
      .image-grid div {{
        box-shadow: 0px 0px 10px rgba(0, 0, 0, 0.2);
      }}
      .image-grid img {{
        max-width: 100%;
        height: auto;
      }}
    </style>
  </head>
  <body>
    <h2>{title}</h2>
    <div class="image-grid">
      {cards}
    </div>
    <footer>{footer}</footer>
  </body>
</html>
"#
    ))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use kernel_lab_filter::FilterPipeline;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn frame() -> CapturedFrame {
        let data = (0..16 * 12).map(|i| (i % 256) as u8).collect();
        let pixels = PixelBuffer::from_vec(16, 12, data).unwrap();
        CapturedFrame::new(pixels, 1708300000000, "http://cam/<frame>")
    }

    #[test]
    fn data_url_round_trips_through_jpeg() {
        let pixels = PixelBuffer::filled(10, 7, 128).unwrap();
        let url = jpeg_data_url(&encode_jpeg("flat", &pixels, 90).unwrap());
        let b64 = url.strip_prefix("data:image/jpeg;base64,").unwrap();
        let jpeg = general_purpose::STANDARD.decode(b64).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (10, 7));
        // Flat grey survives JPEG within a couple of levels.
        assert!(decoded.pixels().all(|p| p.0[0].abs_diff(128) <= 2));
    }

    #[test]
    fn page_has_one_card_per_kernel_in_order() {
        let frame = frame();
        let results = FilterPipeline::new(StdRng::seed_from_u64(3))
            .run(&frame.pixels)
            .unwrap();
        let html = render_page(&results, &frame, &RenderConfig::default()).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h2>Image Filters</h2>"));
        assert!(html.contains("repeat(3, 1fr)"));
        assert_eq!(html.matches("<h3>").count(), 6);
        assert_eq!(html.matches("data:image/jpeg;base64,").count(), 6);

        let positions: Vec<usize> = ["Identity", "Outline", "Blur", "Emboss", "Sharpen", "Random"]
            .iter()
            .map(|name| html.find(&format!("<h3>{name}</h3>")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn footer_is_escaped() {
        let frame = frame();
        let results = FilterPipeline::new(StdRng::seed_from_u64(3))
            .run(&frame.pixels)
            .unwrap();
        let config = RenderConfig {
            title: "Filters & <Kernels>".into(),
            columns: 2,
            jpeg_quality: 50,
        };
        let html = render_page(&results, &frame, &config).unwrap();
        assert!(html.contains("<h2>Filters &amp; &lt;Kernels&gt;</h2>"));
        assert!(html.contains("repeat(2, 1fr)"));
        assert!(html.contains("16x12 frame from http://cam/&lt;frame&gt; at 2024-02-18T23:46:40.000Z"));
    }

    #[test]
    fn escape_html_handles_quotes() {
        assert_eq!(escape_html(r#"a"b'c"#), "a&quot;b&#39;c");
        assert_eq!(escape_html("plain"), "plain");
    }
}
