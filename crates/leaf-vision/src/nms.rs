// Boxes in SSD corner layout, normalized 0..1: (ymin, xmin, ymax, xmax).
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let [ay1, ax1, ay2, ax2] = a;
    let [by1, bx1, by2, bx2] = b;

    let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
    let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
    let inter = iw * ih;
    let a1 = (ax2 - ax1).max(0.0) * (ay2 - ay1).max(0.0);
    let a2 = (bx2 - bx1).max(0.0) * (by2 - by1).max(0.0);
    let union = a1 + a2 - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
