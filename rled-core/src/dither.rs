use crate::surface::{Color, Surface};

/// QuickDraw dithering to the RGB555 lattice.
///
/// Half the error is diffused right on even rows, left on odd rows
/// (serpentine). The remainder is diffused down. The horizontal half uses
/// truncating division and the vertical half rounds up, so an odd error is
/// split across both neighbours instead of losing a step.
pub fn rgb555_dither(surface: &mut Surface) {
    let width = surface.width();
    let height = surface.height();
    for y in 0..height {
        let even = y % 2 == 0;
        for w in 0..width {
            let x = if even { w } else { width - w - 1 };
            let color = surface.at(x, y);
            let quant = color.rgb555();
            let errors = [
                color.r as i32 - quant.r as i32,
                color.g as i32 - quant.g as i32,
                color.b as i32 - quant.b as i32,
            ];
            surface.set(x, y, quant);
            if errors != [0, 0, 0] {
                if even && x + 1 < width {
                    apply_error(surface, x + 1, y, errors, false);
                } else if !even && x > 0 {
                    apply_error(surface, x - 1, y, errors, false);
                }
                if y + 1 < height {
                    apply_error(surface, x, y + 1, errors, true);
                }
            }
        }
    }
}

fn apply_error(surface: &mut Surface, x: u32, y: u32, errors: [i32; 3], round_up: bool) {
    let color = surface.at(x, y);
    let add = if round_up { 1 } else { 0 };
    let adjust = |c: u8, e: i32| (c as i32 + (e + add) / 2).clamp(0, 255) as u8;
    surface.set(
        x,
        y,
        Color {
            r: adjust(color.r, errors[0]),
            g: adjust(color.g, errors[1]),
            b: adjust(color.b, errors[2]),
            a: color.a,
        },
    );
}
