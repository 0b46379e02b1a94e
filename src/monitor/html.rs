//! Static HTML image galleries

use crate::data::image_ops::tensor_to_rgb;
use crate::error::{Error, Result};
use crate::model::Visuals;
use image::imageops::{self, FilterType};
use ndarray::Axis;
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::{Path, PathBuf};

/// One image cell of a gallery row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryImage {
    /// Path relative to the page's `images/` directory
    pub file: String,
    pub caption: String,
}

/// Gallery page at `<web_dir>/index.html`, images under `<web_dir>/images`
#[derive(Debug, Clone)]
pub struct HtmlPage {
    web_dir: PathBuf,
    title: String,
    refresh_secs: Option<u32>,
    body: String,
}

impl HtmlPage {
    pub fn new(web_dir: impl Into<PathBuf>, title: impl Into<String>) -> Result<Self> {
        let page = Self {
            web_dir: web_dir.into(),
            title: title.into(),
            refresh_secs: None,
            body: String::new(),
        };
        fs::create_dir_all(page.image_dir())?;
        Ok(page)
    }

    /// Ask browsers to reload the page periodically
    pub fn with_refresh(mut self, secs: u32) -> Self {
        self.refresh_secs = Some(secs);
        self
    }

    pub fn web_dir(&self) -> &Path {
        &self.web_dir
    }

    pub fn image_dir(&self) -> PathBuf {
        self.web_dir.join("images")
    }

    pub fn index_path(&self) -> PathBuf {
        self.web_dir.join("index.html")
    }

    pub fn add_header(&mut self, text: &str) {
        let _ = writeln!(self.body, "<h3>{}</h3>", escape(text));
    }

    /// One table row of images, each linking to its full-size file
    pub fn add_images(&mut self, images: &[GalleryImage], width: usize) {
        let _ = writeln!(self.body, "<table style=\"table-layout: fixed;\"><tr>");
        for image in images {
            let src = format!("images/{}", escape(&image.file));
            let _ = writeln!(
                self.body,
                "<td halign=\"center\" style=\"word-wrap: break-word;\" valign=\"top\">\
                 <p><a href=\"{src}\"><img style=\"width:{width}px\" src=\"{src}\"></a><br>\
                 <p>{}</p></td>",
                escape(&image.caption)
            );
        }
        let _ = writeln!(self.body, "</tr></table>");
    }

    pub fn render(&self) -> String {
        let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n");
        let _ = writeln!(html, "<title>{}</title>", escape(&self.title));
        if let Some(secs) = self.refresh_secs {
            let _ = writeln!(html, "<meta http-equiv=\"refresh\" content=\"{secs}\">");
        }
        html.push_str("</head>\n<body>\n");
        html.push_str(&self.body);
        html.push_str("</body>\n</html>\n");
        html
    }

    pub fn save(&self) -> Result<()> {
        fs::write(self.index_path(), self.render())?;
        Ok(())
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Save one sample's visuals into the page's image directory and add them as
/// a row headed by the composite's file stem.
///
/// Each label is written as `<stem>_<label>.png`. `aspect_ratio` stretches the
/// width (> 1) or the height (< 1) before saving.
pub fn save_images(
    page: &mut HtmlPage,
    visuals: &Visuals,
    image_path: &Path,
    aspect_ratio: f32,
    width: usize,
) -> Result<()> {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::DataLoad(format!("image path has no name: {}", image_path.display())))?;
    page.add_header(stem);

    let image_dir = page.image_dir();
    let mut row = Vec::with_capacity(visuals.len());
    for (label, images) in visuals.iter() {
        if images.shape()[0] == 0 {
            return Err(Error::Model(format!("visual '{label}' holds no images")));
        }
        let first = images.index_axis(Axis(0), 0);
        let mut img = tensor_to_rgb(&first)?;
        let (w, h) = img.dimensions();
        if aspect_ratio > 1.0 {
            img = imageops::resize(&img, (w as f32 * aspect_ratio) as u32, h, FilterType::CatmullRom);
        } else if aspect_ratio < 1.0 && aspect_ratio > 0.0 {
            img = imageops::resize(&img, w, (h as f32 / aspect_ratio) as u32, FilterType::CatmullRom);
        }

        let file = format!("{stem}_{label}.png");
        let path = image_dir.join(&file);
        img.save(&path)
            .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))?;
        row.push(GalleryImage {
            file,
            caption: label.to_string(),
        });
    }
    page.add_images(&row, width);
    Ok(())
}
