//! Mobile country codes (ITU-T E.212): ISO country and the smallest MNC
//! length used in each country, plus the operators known to use 3-digit
//! MNCs where their country's minimum is 2.

/// `(mcc, iso, smallest_mnc_digits)`, sorted by MCC.
#[rustfmt::skip]
const MCC_TABLE: &[(u16, &str, usize)] = &[
    (202, "gr", 2), (204, "nl", 2), (206, "be", 2), (208, "fr", 2), (212, "mc", 2), (213, "ad", 2),
    (214, "es", 2), (216, "hu", 2), (218, "ba", 2), (219, "hr", 2), (220, "rs", 2), (221, "xk", 2),
    (222, "it", 2), (225, "va", 2), (226, "ro", 2), (228, "ch", 2), (230, "cz", 2), (231, "sk", 2),
    (232, "at", 2), (234, "gb", 2), (235, "gb", 2), (238, "dk", 2), (240, "se", 2), (242, "no", 2),
    (244, "fi", 2), (246, "lt", 2), (247, "lv", 2), (248, "ee", 2), (250, "ru", 2), (255, "ua", 2),
    (257, "by", 2), (259, "md", 2), (260, "pl", 2), (262, "de", 2), (266, "gi", 2), (268, "pt", 2),
    (270, "lu", 2), (272, "ie", 2), (274, "is", 2), (276, "al", 2), (278, "mt", 2), (280, "cy", 2),
    (282, "ge", 2), (283, "am", 2), (284, "bg", 2), (286, "tr", 2), (288, "fo", 2), (289, "ge", 2),
    (290, "gl", 2), (292, "sm", 2), (293, "si", 2), (294, "mk", 2), (295, "li", 2), (297, "me", 2),
    (302, "ca", 3), (308, "pm", 2), (310, "us", 3), (311, "us", 3), (312, "us", 3), (313, "us", 3),
    (314, "us", 3), (315, "us", 3), (316, "us", 3), (330, "pr", 2), (332, "vi", 2), (334, "mx", 3),
    (338, "jm", 3), (340, "gp", 2), (342, "bb", 3), (344, "ag", 3), (346, "ky", 3), (348, "vg", 3),
    (350, "bm", 2), (352, "gd", 2), (354, "ms", 2), (356, "kn", 2), (358, "lc", 2), (360, "vc", 2),
    (362, "cw", 2), (363, "aw", 2), (364, "bs", 2), (365, "ai", 3), (366, "dm", 2), (368, "cu", 2),
    (370, "do", 2), (372, "ht", 2), (374, "tt", 2), (376, "tc", 2), (400, "az", 2), (401, "kz", 2),
    (402, "bt", 2), (404, "in", 2), (405, "in", 2), (406, "in", 2), (410, "pk", 2), (412, "af", 2),
    (413, "lk", 2), (414, "mm", 2), (415, "lb", 2), (416, "jo", 2), (417, "sy", 2), (418, "iq", 2),
    (419, "kw", 2), (420, "sa", 2), (421, "ye", 2), (422, "om", 2), (423, "ps", 2), (424, "ae", 2),
    (425, "il", 2), (426, "bh", 2), (427, "qa", 2), (428, "mn", 2), (429, "np", 2), (430, "ae", 2),
    (431, "ae", 2), (432, "ir", 2), (434, "uz", 2), (436, "tj", 2), (437, "kg", 2), (438, "tm", 2),
    (440, "jp", 2), (441, "jp", 2), (450, "kr", 2), (452, "vn", 2), (454, "hk", 2), (455, "mo", 2),
    (456, "kh", 2), (457, "la", 2), (460, "cn", 2), (461, "cn", 2), (466, "tw", 2), (467, "kp", 2),
    (470, "bd", 2), (472, "mv", 2), (502, "my", 2), (505, "au", 2), (510, "id", 2), (514, "tl", 2),
    (515, "ph", 2), (520, "th", 2), (525, "sg", 2), (528, "bn", 2), (530, "nz", 2), (536, "nr", 2),
    (537, "pg", 2), (539, "to", 2), (540, "sb", 2), (541, "vu", 2), (542, "fj", 2), (543, "wf", 2),
    (544, "as", 2), (545, "ki", 2), (546, "nc", 2), (547, "pf", 2), (548, "ck", 2), (549, "ws", 2),
    (550, "fm", 2), (551, "mh", 2), (552, "pw", 2), (553, "tv", 2), (555, "nu", 2), (602, "eg", 2),
    (603, "dz", 2), (604, "ma", 2), (605, "tn", 2), (606, "ly", 2), (607, "gm", 2), (608, "sn", 2),
    (609, "mr", 2), (610, "ml", 2), (611, "gn", 2), (612, "ci", 2), (613, "bf", 2), (614, "ne", 2),
    (615, "tg", 2), (616, "bj", 2), (617, "mu", 2), (618, "lr", 2), (619, "sl", 2), (620, "gh", 2),
    (621, "ng", 2), (622, "td", 2), (623, "cf", 2), (624, "cm", 2), (625, "cv", 2), (626, "st", 2),
    (627, "gq", 2), (628, "ga", 2), (629, "cg", 2), (630, "cd", 2), (631, "ao", 2), (632, "gw", 2),
    (633, "sc", 2), (634, "sd", 2), (635, "rw", 2), (636, "et", 2), (637, "so", 2), (638, "dj", 2),
    (639, "ke", 2), (640, "tz", 2), (641, "ug", 2), (642, "bi", 2), (643, "mz", 2), (645, "zm", 2),
    (646, "mg", 2), (647, "re", 2), (648, "zw", 2), (649, "na", 2), (650, "mw", 2), (651, "ls", 2),
    (652, "bw", 2), (653, "sz", 2), (654, "km", 2), (655, "za", 2), (657, "er", 2), (659, "ss", 2),
    (702, "bz", 2), (704, "gt", 2), (706, "sv", 2), (708, "hn", 3), (710, "ni", 2), (712, "cr", 2),
    (714, "pa", 2), (716, "pe", 2), (722, "ar", 3), (724, "br", 2), (730, "cl", 2), (732, "co", 3),
    (734, "ve", 2), (736, "bo", 2), (738, "gy", 2), (740, "ec", 2), (742, "gf", 2), (744, "py", 2),
    (746, "sr", 2), (748, "uy", 2), (750, "fk", 2),
];

/// Inclusive MCC+MNC ranges whose MNC has three digits.
const THREE_DIGIT_MNC: &[(u32, u32)] = &[
    (302_370, 302_370),
    (302_720, 302_720),
    (310_260, 310_260),
    (405_025, 405_047),
    (405_750, 405_756),
    (405_799, 405_886),
    (405_908, 405_932),
    (502_142, 502_143),
    (502_145, 502_148),
];

fn entry(mcc: u16) -> Option<&'static (u16, &'static str, usize)> {
    MCC_TABLE
        .binary_search_by_key(&mcc, |(m, _, _)| *m)
        .ok()
        .map(|i| &MCC_TABLE[i])
}

/// ISO 3166 alpha-2 country for `mcc`.
pub fn country_iso(mcc: u16) -> Option<&'static str> {
    entry(mcc).map(|(_, iso, _)| *iso)
}

/// Smallest MNC length used under `mcc`.
pub fn smallest_mnc_digits(mcc: u16) -> Option<usize> {
    entry(mcc).map(|(_, _, digits)| *digits)
}

/// Whether the first six IMSI digits name an operator with a 3-digit MNC.
pub fn has_three_digit_mnc(mcc_mnc: &str) -> bool {
    mcc_mnc
        .get(..6)
        .and_then(|p| p.parse::<u32>().ok())
        .is_some_and(|code| {
            THREE_DIGIT_MNC
                .iter()
                .any(|&(lo, hi)| (lo..=hi).contains(&code))
        })
}

/// MNC length for an IMSI without an authoritative EF_AD value: the
/// 3-digit operator list, then the country minimum.
pub fn mnc_length_for_imsi(imsi: &str) -> Option<usize> {
    if has_three_digit_mnc(imsi) {
        return Some(3);
    }
    imsi.get(..3)
        .and_then(|mcc| mcc.parse::<u16>().ok())
        .and_then(smallest_mnc_digits)
}

/// MCC part of an operator numeric or IMSI.
pub fn mcc_of(numeric: &str) -> Option<u16> {
    numeric.get(..3)?.parse().ok()
}
