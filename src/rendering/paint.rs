/// Display list built from a page layout

use crate::rendering::layout::{ElementType, PageLayout, CELL};

pub type Rgba = [u8; 4];

pub const TEXT_COLOR: Rgba = [0, 0, 0, 255];
const RULE_COLOR: Rgba = [160, 160, 160, 255];
const CODE_BACKGROUND: Rgba = [245, 245, 245, 255];

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: Rgba,
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        scale: u32,
        rgba: Rgba,
    },
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        src: String,
    },
}

/// Translate layout nodes into paint commands, back to front
pub fn build_display_list(layout: &PageLayout) -> Vec<PaintCommand> {
    let mut cmds = Vec::with_capacity(layout.nodes.len());
    for node in &layout.nodes {
        let r = &node.lb.rect;
        let pad = node.lb.box_model.padding as i32;
        match &node.elem_type {
            ElementType::Image { src } => cmds.push(PaintCommand::Image {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                src: src.clone(),
            }),
            ElementType::Rule => cmds.push(PaintCommand::SolidRect {
                x: r.x,
                y: r.y,
                width: r.width,
                height: r.height,
                rgba: RULE_COLOR,
            }),
            ElementType::ListItem => {
                let bullet = (CELL / 2) as i32;
                cmds.push(PaintCommand::SolidRect {
                    x: r.x + pad,
                    y: r.y + pad + bullet / 2,
                    width: bullet as u32,
                    height: bullet as u32,
                    rgba: TEXT_COLOR,
                });
                cmds.push(PaintCommand::Text {
                    x: r.x + pad + 2 * CELL as i32,
                    y: r.y + pad,
                    text: node.text.clone(),
                    scale: node.scale,
                    rgba: TEXT_COLOR,
                });
            }
            ElementType::Preformatted => {
                cmds.push(PaintCommand::SolidRect {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    rgba: CODE_BACKGROUND,
                });
                cmds.push(PaintCommand::Text {
                    x: r.x + pad,
                    y: r.y + pad,
                    text: node.text.clone(),
                    scale: node.scale,
                    rgba: TEXT_COLOR,
                });
            }
            ElementType::Heading | ElementType::Paragraph => {
                cmds.push(PaintCommand::Text {
                    x: r.x + pad,
                    y: r.y + pad,
                    text: node.text.clone(),
                    scale: node.scale,
                    rgba: TEXT_COLOR,
                });
            }
        }
    }
    cmds
}
